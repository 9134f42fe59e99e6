//! Cumulative console buffer with incremental pattern search.
//!
//! Output is accumulated as it arrives, with ANSI escape sequences stripped.
//! Each search only looks at text that arrived since the previous search plus
//! a bounded look-back, so that waiting on a chatty console stays linear in
//! the amount of output instead of rescanning everything per chunk.

use std::fmt;
use std::ops::Range;

use bytes::{Buf, BytesMut};
use vte::{Parser, Perform};

use super::patterns::PatternSet;

/// Buffer for accumulating output and searching it for patterns.
#[derive(Debug)]
pub struct PatternBuffer {
    /// The accumulated, ANSI-stripped output.
    buffer: BytesMut,

    /// Length of the prefix already searched without a match.
    scanned: usize,

    /// How many already-searched bytes to search again so that matches
    /// spanning a chunk boundary are not missed.
    search_depth: usize,

    stripper: AnsiStripper,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified look-back depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            search_depth,
            stripper: AnsiStripper::new(),
        }
    }

    /// Extend the buffer with new data, stripping ANSI escape codes.
    ///
    /// Escape sequences split across calls are handled.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned = self.stripper.strip(data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// Offset where the next search starts.
    fn search_start(&self) -> usize {
        self.scanned.saturating_sub(self.search_depth)
    }

    /// Search the unscanned region (plus look-back) for the winning pattern.
    ///
    /// A miss marks the whole buffer as scanned.
    pub fn find(&mut self, patterns: &PatternSet) -> Option<(usize, Range<usize>)> {
        let hit = patterns.find_at(&self.buffer, self.search_start());
        if hit.is_none() {
            self.scanned = self.buffer.len();
        }
        hit
    }

    /// Forget the scan position so the next search covers the whole buffer.
    ///
    /// Needed whenever the pattern set changes between searches.
    pub fn rescan(&mut self) {
        self.scanned = 0;
    }

    /// Remove everything up to the end of `range`, returning the text before
    /// the range and the text inside it.
    pub fn consume(&mut self, range: Range<usize>) -> (String, String) {
        let before = String::from_utf8_lossy(&self.buffer[..range.start]).into_owned();
        let matched = String::from_utf8_lossy(&self.buffer[range.clone()]).into_owned();
        // BytesMut::advance() is an O(1) pointer bump.
        self.buffer.advance(range.end);
        self.scanned = 0;
        (before, matched)
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        self.scanned = 0;
        self.buffer.split().to_vec()
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    /// Get the look-back depth.
    pub fn search_depth(&self) -> usize {
        self.search_depth
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Streaming ANSI escape remover built on the vte state machine.
struct AnsiStripper {
    parser: Parser,
}

impl AnsiStripper {
    fn new() -> Self {
        Self {
            parser: Parser::new(),
        }
    }

    fn strip(&mut self, data: &[u8]) -> Vec<u8> {
        let mut printable = Printable(Vec::with_capacity(data.len()));
        self.parser.advance(&mut printable, data);
        printable.0
    }
}

impl fmt::Debug for AnsiStripper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnsiStripper").finish_non_exhaustive()
    }
}

struct Printable(Vec<u8>);

impl Perform for Printable {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.0.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.0.push(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"Hello, world!");
        assert_eq!(buffer.as_slice(), b"Hello, world!");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[32mGreen text\x1b[0m\r\n");
        assert_eq!(buffer.as_slice(), b"Green text\r\n");
    }

    #[test]
    fn test_ansi_sequence_split_across_chunks() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"ok \x1b[1");
        buffer.extend(b";31mred\x1b[0m");
        assert_eq!(buffer.as_slice(), b"ok red");
    }

    #[test]
    fn test_match_across_chunk_boundary() {
        let mut buffer = PatternBuffer::new(100);
        let set = PatternSet::from_strs(&["Kernel panic"]).unwrap();

        buffer.extend(b"[  12.5] Kernel pa");
        assert!(buffer.find(&set).is_none());

        buffer.extend(b"nic - not syncing");
        let (index, range) = buffer.find(&set).unwrap();
        assert_eq!(index, 0);
        assert_eq!(&buffer.as_slice()[range], b"Kernel panic");
    }

    #[test]
    fn test_scanned_prefix_is_not_searched_again() {
        let mut buffer = PatternBuffer::new(4);
        let set = PatternSet::from_strs(&["needle"]).unwrap();

        buffer.extend(b"needle");
        buffer.extend(&[b'x'; 100]);
        // The first scan happens after both chunks, so it sees the needle.
        assert!(buffer.find(&set).is_some());

        let mut buffer = PatternBuffer::new(4);
        buffer.extend(&[b'x'; 100]);
        assert!(buffer.find(&set).is_none());
        buffer.extend(b"needle");
        assert!(buffer.find(&set).is_some());
        assert_eq!(buffer.search_start(), 96);
    }

    #[test]
    fn test_rescan_searches_everything() {
        let mut buffer = PatternBuffer::new(4);
        buffer.extend(b"login: ");
        buffer.extend(&[b'x'; 100]);
        let first = PatternSet::from_strs(&["Password:"]).unwrap();
        assert!(buffer.find(&first).is_none());

        let second = PatternSet::from_strs(&["login:"]).unwrap();
        assert!(buffer.find(&second).is_none());
        buffer.rescan();
        assert!(buffer.find(&second).is_some());
    }

    #[test]
    fn test_consume_splits_before_and_match() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"output line\r\n# trailing");
        let set = PatternSet::from_strs(&["#"]).unwrap();
        let (_, range) = buffer.find(&set).unwrap();
        let (before, matched) = buffer.consume(range);
        assert_eq!(before, "output line\r\n");
        assert_eq!(matched, "#");
        assert_eq!(buffer.as_slice(), b" trailing");
    }

    #[test]
    fn test_take_clears_buffer() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"test data");
        assert_eq!(buffer.take(), b"test data");
        assert!(buffer.is_empty());
    }
}
