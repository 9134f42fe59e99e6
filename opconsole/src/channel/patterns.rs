//! Labeled patterns and ordered pattern sets.

use std::ops::Range;

use regex::bytes::Regex;

/// A single labeled regex pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    label: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a regex pattern, labeled with its own source text.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Self::labeled(pattern, pattern)
    }

    /// Compile a regex pattern with an explicit label.
    pub fn labeled(label: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            label: label.into(),
            regex: Regex::new(pattern)?,
        })
    }

    /// Match `text` literally.
    ///
    /// # Panics
    ///
    /// Panics only if the escaped text exceeds the regex size limit.
    pub fn literal(text: &str) -> Self {
        Self {
            label: text.to_string(),
            regex: Regex::new(&regex::escape(text)).expect("escaped literal is a valid regex"),
        }
    }

    /// The label shown in logs and match results.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The compiled regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// An ordered set of patterns evaluated together in a single wait.
///
/// The first `priority` patterns form a priority group: if any of them
/// matches inside the scanned window it is reported, even when a pattern
/// outside the group matched earlier in the stream. Within a group the
/// earliest match in the stream wins and ties go to the lowest index.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    priority: usize,
}

impl PatternSet {
    /// Create a set with no priority group.
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns,
            priority: 0,
        }
    }

    /// Compile each string as a regex pattern.
    pub fn from_strs(patterns: &[&str]) -> Result<Self, regex::Error> {
        patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Build a set whose priority group is every pattern of `priority`,
    /// followed by the patterns of `rest`.
    pub fn layered(priority: &PatternSet, rest: &PatternSet) -> Self {
        let mut patterns = Vec::with_capacity(priority.len() + rest.len());
        patterns.extend(priority.patterns.iter().cloned());
        patterns.extend(rest.patterns.iter().cloned());
        Self {
            patterns,
            priority: priority.len(),
        }
    }

    /// Append a pattern (outside the priority group).
    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, pattern: Pattern) -> Self {
        self.push(pattern);
        self
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Size of the priority group.
    pub fn priority_len(&self) -> usize {
        self.priority
    }

    /// Pattern at `index`.
    pub fn get(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    /// Iterate over the patterns in order.
    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter()
    }

    /// Find the winning match in `haystack`, considering only matches that
    /// start at or after `start`.
    ///
    /// Regex context (anchors, word boundaries) still sees the full haystack.
    pub fn find_at(&self, haystack: &[u8], start: usize) -> Option<(usize, Range<usize>)> {
        let (priority, rest) = self.patterns.split_at(self.priority);
        earliest(priority, 0, haystack, start)
            .or_else(|| earliest(rest, self.priority, haystack, start))
    }
}

impl From<Pattern> for PatternSet {
    fn from(pattern: Pattern) -> Self {
        Self::new(vec![pattern])
    }
}

impl From<Vec<Pattern>> for PatternSet {
    fn from(patterns: Vec<Pattern>) -> Self {
        Self::new(patterns)
    }
}

fn earliest(
    patterns: &[Pattern],
    offset: usize,
    haystack: &[u8],
    start: usize,
) -> Option<(usize, Range<usize>)> {
    let mut best: Option<(usize, Range<usize>)> = None;
    for (i, pattern) in patterns.iter().enumerate() {
        if let Some(m) = pattern.regex.find_at(haystack, start) {
            // Strictly earlier only, so ties keep the lower index.
            if best.as_ref().is_none_or(|(_, r)| m.start() < r.start) {
                best = Some((offset + i, m.range()));
            }
        }
    }
    best
}
