//! A live console: transport stream plus its accumulated read buffer.

use std::time::Duration;

use log::{debug, trace};
use memchr::memchr;
use tokio::time::Instant;

use super::buffer::PatternBuffer;
use super::patterns::PatternSet;
use crate::error::Result;
use crate::transport::{ConsoleTransport, ReadEvent};

/// Log target used for the console transcript.
pub const TRANSCRIPT_TARGET: &str = "opconsole::console";

/// A successful match from a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Index of the matching pattern in the set that was waited on.
    pub index: usize,

    /// Label of the matching pattern.
    pub label: String,

    /// Text consumed ahead of the match.
    pub before: String,

    /// The matched text itself.
    pub after: String,
}

/// How a wait ended, when it did not raise an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A pattern matched.
    Matched(MatchResult),

    /// The deadline passed. `before` is a copy of the unconsumed buffer,
    /// which stays in place for the next wait.
    Timeout { before: String },

    /// The stream closed. `before` holds whatever was left in the buffer.
    Eof { before: String },
}

impl WaitOutcome {
    /// The match, if any.
    pub fn matched(&self) -> Option<&MatchResult> {
        match self {
            WaitOutcome::Matched(m) => Some(m),
            _ => None,
        }
    }

    /// Index of the matching pattern, if any.
    pub fn index(&self) -> Option<usize> {
        self.matched().map(|m| m.index)
    }

    /// Whether the wait timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitOutcome::Timeout { .. })
    }

    /// Whether the stream reached EOF.
    pub fn is_eof(&self) -> bool {
        matches!(self, WaitOutcome::Eof { .. })
    }
}

/// Interactive console over any [`ConsoleTransport`].
///
/// Owns the stream exclusively; all reads go through the cumulative
/// [`PatternBuffer`] so that a timed-out wait can be resumed safely.
pub struct Console {
    transport: Box<dyn ConsoleTransport>,
    buffer: PatternBuffer,
    /// Partial line held back until its newline arrives, for the transcript.
    transcript: Vec<u8>,
    eof: bool,
}

impl Console {
    /// Wrap an open transport.
    pub fn new(transport: Box<dyn ConsoleTransport>, search_depth: usize) -> Self {
        Self {
            transport,
            buffer: PatternBuffer::new(search_depth),
            transcript: Vec::new(),
            eof: false,
        }
    }

    /// Human-readable name of the console endpoint.
    pub fn target(&self) -> &str {
        self.transport.target()
    }

    /// Whether the stream is still usable.
    pub fn is_alive(&mut self) -> bool {
        !self.eof && self.transport.is_alive()
    }

    /// Write raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.transport.write(data).await
    }

    /// Write a line terminated with a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("{}: send {:?}", self.target(), line);
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.send(&data).await
    }

    /// Send a control character, e.g. `'c'` for Ctrl-C.
    pub async fn send_control(&mut self, key: char) -> Result<()> {
        debug!("{}: send ^{}", self.target(), key.to_ascii_uppercase());
        let code = (key.to_ascii_lowercase() as u8) & 0x1f;
        self.send(&[code]).await
    }

    /// Graceful exit keystrokes for this transport.
    pub fn exit_sequence(&self) -> Vec<u8> {
        self.transport.exit_sequence().to_vec()
    }

    /// Read until one of `patterns` matches, the stream closes, or `timeout`
    /// elapses.
    ///
    /// This is the raw primitive: it does not add any baseline patterns.
    pub async fn read_until(
        &mut self,
        patterns: &PatternSet,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let deadline = deadline_after(timeout);
        // Earlier waits may have scanned the buffer for other patterns.
        self.buffer.rescan();

        loop {
            if let Some((index, range)) = self.buffer.find(patterns) {
                let (before, after) = self.buffer.consume(range);
                let label = patterns
                    .get(index)
                    .map(|p| p.label().to_string())
                    .unwrap_or_default();
                trace!("{}: matched {:?}", self.target(), label);
                return Ok(WaitOutcome::Matched(MatchResult {
                    index,
                    label,
                    before,
                    after,
                }));
            }

            if self.eof {
                return Ok(self.eof_outcome());
            }

            match self.transport.read_available(deadline).await? {
                ReadEvent::Data(data) => {
                    self.log_transcript(&data);
                    self.buffer.extend(&data);
                }
                ReadEvent::Timeout => {
                    return Ok(WaitOutcome::Timeout {
                        before: self.buffer.as_str_lossy().into_owned(),
                    });
                }
                ReadEvent::Eof => {
                    debug!("{}: EOF", self.target());
                    self.eof = true;
                    self.flush_transcript();
                }
            }
        }
    }

    fn eof_outcome(&mut self) -> WaitOutcome {
        WaitOutcome::Eof {
            before: String::from_utf8_lossy(&self.buffer.take()).into_owned(),
        }
    }

    /// Unconsumed buffered text.
    pub fn pending(&self) -> std::borrow::Cow<'_, str> {
        self.buffer.as_str_lossy()
    }

    /// Drop all unconsumed buffered text.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Forcibly close the stream.
    pub async fn terminate(&mut self) -> Result<()> {
        self.flush_transcript();
        self.eof = true;
        self.transport.terminate().await
    }

    /// Give back the transport along with any unconsumed text.
    pub(crate) fn into_parts(mut self) -> (Box<dyn ConsoleTransport>, Vec<u8>) {
        let leftover = self.buffer.take();
        (self.transport, leftover)
    }

    fn log_transcript(&mut self, data: &[u8]) {
        if !log::log_enabled!(target: TRANSCRIPT_TARGET, log::Level::Trace) {
            return;
        }
        self.transcript.extend_from_slice(data);
        while let Some(pos) = memchr(b'\n', &self.transcript) {
            let line: Vec<u8> = self.transcript.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            trace!(target: TRANSCRIPT_TARGET, "{}: {}", self.transport.target(), text.trim_end());
        }
    }

    fn flush_transcript(&mut self) {
        if !self.transcript.is_empty() {
            let text = String::from_utf8_lossy(&self.transcript).into_owned();
            trace!(target: TRANSCRIPT_TARGET, "{}: {}", self.transport.target(), text.trim_end());
            self.transcript.clear();
        }
    }
}

/// `timeout` from now, saturating far in the future for huge timeouts.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

// About 30 years.
const FAR_FUTURE_SECS: u64 = 86400 * 365 * 30;
