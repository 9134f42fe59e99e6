//! Partition console via a management console virtual terminal.
//!
//! The management console is reached over SSH; `mkvterm` then attaches that
//! shell to the partition's console. From then on the stream behaves like any
//! other console, except that leaving it takes the `~.` escape.

use async_trait::async_trait;
use log::{debug, info};
use tokio::time::Instant;

use super::config::VirtualTerminalConfig;
use super::ssh::SshTransport;
use super::{ConsoleTransport, ReadEvent};
use crate::channel::{Console, Pattern, PatternSet, WaitOutcome};
use crate::error::{Result, TransportError};

/// Printed by `mkvterm` once the partition console is attached.
pub const OPEN_COMPLETED: &str = "Open Completed.";

/// Virtual terminal session layered on an SSH shell.
pub struct VirtualTerminalTransport {
    inner: Box<dyn ConsoleTransport>,
    target: String,
    /// Partition output that arrived with the open banner.
    pending: Vec<u8>,
}

impl VirtualTerminalTransport {
    /// Connect to the management console and open the partition's terminal.
    pub async fn open(config: VirtualTerminalConfig) -> Result<Self> {
        let shell = SshTransport::connect(config.console.clone()).await?;
        Self::attach(Box::new(shell), &config).await
    }

    /// Run `mkvterm` on an already open management console shell.
    pub(crate) async fn attach(
        shell: Box<dyn ConsoleTransport>,
        config: &VirtualTerminalConfig,
    ) -> Result<Self> {
        let target = config.target();
        let mut console = Console::new(shell, 1000);

        info!("{}: opening virtual terminal", target);
        console.send_line(&config.open_command()).await?;

        let opened = PatternSet::from(Pattern::literal(OPEN_COMPLETED));
        let outcome = console.read_until(&opened, config.open_timeout).await?;

        let reason = match outcome {
            WaitOutcome::Matched(_) => {
                debug!("{}: virtual terminal open", target);
                let (inner, pending) = console.into_parts();
                return Ok(Self {
                    inner,
                    target,
                    pending,
                });
            }
            WaitOutcome::Timeout { before } => format!(
                "no '{}' within {:?}: {}",
                OPEN_COMPLETED,
                config.open_timeout,
                before.trim()
            ),
            WaitOutcome::Eof { before } => {
                format!("management console closed the session: {}", before.trim())
            }
        };

        if let Err(e) = console.terminate().await {
            debug!("{}: terminate after failed open: {}", target, e);
        }
        Err(TransportError::SetupFailed { target, reason }.into())
    }
}

#[async_trait]
impl ConsoleTransport for VirtualTerminalTransport {
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadEvent> {
        if !self.pending.is_empty() {
            return Ok(ReadEvent::Data(std::mem::take(&mut self.pending)));
        }
        self.inner.read_available(deadline).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write(data).await
    }

    fn is_alive(&mut self) -> bool {
        self.inner.is_alive()
    }

    async fn terminate(&mut self) -> Result<()> {
        self.inner.terminate().await
    }

    fn exit_sequence(&self) -> &[u8] {
        b"~."
    }

    fn target(&self) -> &str {
        &self.target
    }
}
