//! Transport layer: how a console is reached.
//!
//! Three transports share one capability interface, [`ConsoleTransport`]:
//! a local process on a pseudo-terminal, an SSH shell, and a management
//! console virtual terminal. [`TransportDescriptor`] selects between them and
//! implements [`Connector`], which the session uses to (re)open the stream.

pub mod config;
mod local;
mod ssh;
mod vterm;

pub use config::{
    AuthMethod, HostKeyVerification, LocalProcessConfig, SshConfig, TransportDescriptor,
    VirtualTerminalConfig,
};
pub use local::LocalTransport;
pub use ssh::SshTransport;
pub use vterm::VirtualTerminalTransport;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;

/// Result of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Some bytes arrived.
    Data(Vec<u8>),

    /// Nothing arrived before the deadline.
    Timeout,

    /// The stream is closed; no more data will arrive.
    Eof,
}

/// An open, bidirectional console stream.
#[async_trait]
pub trait ConsoleTransport: Send {
    /// Wait for the next chunk of output, but no later than `deadline`.
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadEvent>;

    /// Write raw bytes to the console.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Whether the far end is still there.
    fn is_alive(&mut self) -> bool;

    /// Forcibly close the stream. Safe to call more than once.
    async fn terminate(&mut self) -> Result<()>;

    /// Keystrokes that ask the far end to end the session.
    fn exit_sequence(&self) -> &[u8] {
        b"exit\n"
    }

    /// Human-readable endpoint name for logs and errors.
    fn target(&self) -> &str;
}

/// Opens new console streams.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh stream.
    async fn open(&self) -> Result<Box<dyn ConsoleTransport>>;

    /// Human-readable endpoint name for logs and errors.
    fn target(&self) -> String;

    /// Whether the sentinel prompt should be set up right after connecting.
    ///
    /// Consoles that may still be showing firmware output defer this to the
    /// first command.
    fn prompt_on_connect(&self) -> bool {
        false
    }

    /// Longest a successful open can take by the transport's own timeouts.
    ///
    /// The session never cuts an open short of this.
    fn setup_bound(&self) -> Option<Duration> {
        None
    }
}

#[async_trait]
impl Connector for TransportDescriptor {
    async fn open(&self) -> Result<Box<dyn ConsoleTransport>> {
        match self {
            TransportDescriptor::Local(config) => Ok(Box::new(LocalTransport::spawn(config)?)),
            TransportDescriptor::Ssh(config) => {
                Ok(Box::new(SshTransport::connect(config.clone()).await?))
            }
            TransportDescriptor::VirtualTerminal(config) => {
                Ok(Box::new(VirtualTerminalTransport::open(config.clone()).await?))
            }
        }
    }

    fn target(&self) -> String {
        TransportDescriptor::target(self)
    }

    fn prompt_on_connect(&self) -> bool {
        matches!(self, TransportDescriptor::Ssh(_))
    }

    fn setup_bound(&self) -> Option<Duration> {
        match self {
            TransportDescriptor::Local(_) => None,
            TransportDescriptor::Ssh(config) => Some(config.timeout),
            TransportDescriptor::VirtualTerminal(config) => {
                Some(config.console.timeout + config.open_timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionSettings;

    #[test]
    fn test_setup_bound_covers_transport_timeouts() {
        let ssh = SshConfig::new("bmc", "root");
        let vterm = TransportDescriptor::VirtualTerminal(VirtualTerminalConfig::new(
            ssh.clone(),
            "Server-1",
            "lpar2",
        ));
        assert_eq!(
            TransportDescriptor::Ssh(ssh).setup_bound(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(vterm.setup_bound(), Some(Duration::from_secs(90)));

        // The vterm open timeout can fire before the session gives up.
        assert!(vterm.setup_bound().unwrap() > SessionSettings::default().setup_timeout);
    }

    #[test]
    fn test_local_has_no_setup_bound() {
        let local = TransportDescriptor::Local(LocalProcessConfig::new("qemu-system-ppc64"));
        assert_eq!(local.setup_bound(), None);
    }
}
