//! Channel layer for pattern matching over console streams.
//!
//! This module handles the accumulated read buffer, ANSI stripping and
//! the raw "read until one of these patterns" primitive.

mod buffer;
mod console;
mod patterns;

pub use buffer::PatternBuffer;
pub use console::{Console, MatchResult, TRANSCRIPT_TARGET, WaitOutcome};
pub use patterns::{Pattern, PatternSet};
