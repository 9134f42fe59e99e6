//! # opconsole
//!
//! Console sessions and an expect engine for hardware-in-the-loop firmware
//! testing.
//!
//! opconsole drives interactive text consoles (local simulators on a PTY,
//! SSH shells, management console virtual terminals) and matches their
//! output against caller patterns. Every wait also watches for a fixed set of
//! firmware and kernel failure signatures, which surface as typed
//! [`Fault`]s instead of being mistaken for ordinary output.
//!
//! ## Features
//!
//! - Async transports via portable-pty and russh
//! - Incremental pattern search over an ANSI-stripped buffer
//! - Kernel panic, lockup, OOPS, firmware assert and platform error detection
//! - Transparent reconnection with a bounded retry budget
//! - Shell commands framed by a unique prompt, with exit codes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use opconsole::{SessionBuilder, SshConfig, TransportDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), opconsole::Error> {
//!     let descriptor = TransportDescriptor::Ssh(SshConfig::new("192.168.1.1", "root"));
//!     let mut session = SessionBuilder::new(descriptor).build()?;
//!
//!     session.connect().await?;
//!
//!     let output = session.run_command("uname -a", None).await?;
//!     println!("{}", output);
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod expect;
pub mod fault;
pub mod session;
pub mod system;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use channel::{MatchResult, Pattern, PatternSet, WaitOutcome};
pub use config::{ConsoleConfig, SessionSettings};
pub use error::Error;
pub use expect::ExpectEngine;
pub use fault::{Fault, FaultKind};
pub use session::{CommandOutput, Session, SessionBuilder, SessionState};
pub use system::{SystemHandle, SystemState};
pub use transport::{AuthMethod, SshConfig, TransportDescriptor};
