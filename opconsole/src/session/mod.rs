//! Console sessions: lifecycle, liveness and raw interaction.
//!
//! A [`Session`] owns at most one open [`Console`]. It is `Connected` exactly
//! when that console exists, so the state can't drift from reality.

mod builder;
mod command;

pub use builder::SessionBuilder;
pub use command::CommandOutput;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::channel::{Console, MatchResult, PatternSet, WaitOutcome};
use crate::config::SessionSettings;
use crate::error::{ChannelError, Error, Result, SessionError, TransportError};
use crate::expect::ExpectEngine;
use crate::system::SystemHandle;
use crate::transport::Connector;

/// Whether a session currently holds an open console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
}

/// Interactive session over any transport.
///
/// # Example
///
/// ```rust,no_run
/// use opconsole::{ConsoleConfig, SessionBuilder};
///
/// # async fn example() -> Result<(), opconsole::Error> {
/// let config = ConsoleConfig::from_path("bmc.toml")?;
/// let mut session = SessionBuilder::from_config(config).build()?;
///
/// session.connect().await?;
/// let output = session.run_command("uname -r", None).await?;
/// println!("{}", output);
///
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
    engine: ExpectEngine,
    system: Option<SystemHandle>,

    /// The open console (None when disconnected).
    console: Option<Console>,

    /// Prompt sentinel for the current connection.
    sentinel: String,

    /// Whether the sentinel prompt is set on the current connection.
    prompt_ready: bool,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(connector: Arc<dyn Connector>, settings: SessionSettings) -> Self {
        let engine = ExpectEngine::from_settings(&settings);
        Self {
            connector,
            settings,
            engine,
            system: None,
            console: None,
            sentinel: command::new_sentinel(),
            prompt_ready: false,
        }
    }

    /// Attach the shared system state that faults annotate.
    pub fn set_system(&mut self, system: SystemHandle) {
        self.system = Some(system);
    }

    pub fn system(&self) -> Option<&SystemHandle> {
        self.system.as_ref()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Human-readable console endpoint.
    pub fn target(&self) -> String {
        self.connector.target()
    }

    pub fn state(&self) -> SessionState {
        if self.console.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Whether the session holds a console whose stream is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.console.as_mut().is_some_and(Console::is_alive)
    }

    /// Open the console.
    ///
    /// For transports that ask for it, the sentinel prompt is set up right
    /// away; otherwise that waits for the first command. On any failure the
    /// session stays disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.console.is_some() {
            return Err(SessionError::AlreadyConnected.into());
        }

        let target = self.connector.target();
        debug!("{}: connecting", target);

        let setup_timeout = self.setup_timeout();
        let transport = match tokio::time::timeout(setup_timeout, self.connector.open()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::SetupFailed {
                    target,
                    reason: format!("not ready within {:?}", setup_timeout),
                }
                .into());
            }
        };

        self.console = Some(Console::new(transport, self.settings.search_depth));
        self.sentinel = command::new_sentinel();
        self.prompt_ready = false;

        if self.connector.prompt_on_connect() {
            if let Err(e) = self.ensure_prompt().await {
                self.drop_console().await;
                return Err(e);
            }
        }

        info!("{}: connected", target);
        Ok(())
    }

    /// Configured setup timeout, stretched to cover the transport's own.
    fn setup_timeout(&self) -> Duration {
        match self.connector.setup_bound() {
            Some(bound) => bound.max(self.settings.setup_timeout),
            None => self.settings.setup_timeout,
        }
    }

    /// Make sure there is a live console, reconnecting if it died.
    ///
    /// A dead console is replaced by up to `reconnect_attempts` opens,
    /// `reconnect_delay` apart. Faults are not retried.
    pub async fn ensure_live(&mut self) -> Result<()> {
        if self.console.is_none() {
            return self.connect().await;
        }
        if self.is_alive() {
            return Ok(());
        }

        let target = self.connector.target();
        warn!("{}: console died, reconnecting", target);
        self.drop_console().await;

        let attempts = self.settings.reconnect_attempts;
        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(()) => {
                    info!("{}: reconnected on attempt {}", target, attempt);
                    return Ok(());
                }
                Err(e) if e.is_fault() => return Err(e),
                Err(e) => debug!("{}: reconnect attempt {} failed: {}", target, attempt, e),
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.reconnect_delay).await;
            }
        }

        Err(SessionError::ConsoleUnavailable { target, attempts }.into())
    }

    /// Leave the console: exit sequence, bounded wait for EOF, then a forced
    /// terminate. Does nothing when disconnected.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut console) = self.console.take() else {
            return Ok(());
        };
        self.prompt_ready = false;

        if console.is_alive() {
            let exit = console.exit_sequence();
            match console.send(&exit).await {
                Ok(()) => {
                    let outcome = console
                        .read_until(&PatternSet::default(), self.settings.close_timeout)
                        .await;
                    if !matches!(outcome, Ok(WaitOutcome::Eof { .. })) {
                        debug!("{}: no EOF after exit sequence", console.target());
                    }
                }
                Err(e) => debug!("{}: exit sequence not sent: {}", console.target(), e),
            }
        }

        info!("{}: closing", console.target());
        console.terminate().await
    }

    /// Wait for one of `patterns`, always watching for failure signatures
    /// and disconnect notices.
    ///
    /// `timeout` of `None` or zero means the session default. Match indices
    /// are relative to `patterns`.
    pub async fn wait_for(
        &mut self,
        patterns: &PatternSet,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        let timeout = self.settings.resolve_timeout(timeout);
        self.expect(patterns, timeout).await
    }

    /// Like [`wait_for`](Self::wait_for) with regex strings, treating a
    /// timeout or closed stream as an error.
    pub async fn wait_for_match(
        &mut self,
        patterns: &[&str],
        timeout: Option<Duration>,
    ) -> Result<MatchResult> {
        let set = PatternSet::from_strs(patterns).map_err(ChannelError::InvalidPattern)?;
        let timeout = self.settings.resolve_timeout(timeout);
        match self.expect(&set, timeout).await? {
            WaitOutcome::Matched(m) => Ok(m),
            WaitOutcome::Timeout { .. } => Err(ChannelError::PatternTimeout(timeout).into()),
            WaitOutcome::Eof { .. } => {
                self.drop_console().await;
                Err(ChannelError::Closed.into())
            }
        }
    }

    /// Write raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.console_mut()?.send(data).await
    }

    /// Write a line terminated with a newline.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.console_mut()?.send_line(line).await
    }

    /// Send a control character, e.g. `'c'` for Ctrl-C.
    pub async fn send_control(&mut self, key: char) -> Result<()> {
        self.console_mut()?.send_control(key).await
    }

    fn console_mut(&mut self) -> Result<&mut Console> {
        Ok(self.console.as_mut().ok_or(SessionError::NotConnected)?)
    }

    /// Baseline-aware wait. A disconnect notice tears the console down.
    async fn expect(&mut self, patterns: &PatternSet, timeout: Duration) -> Result<WaitOutcome> {
        let console = self.console.as_mut().ok_or(SessionError::NotConnected)?;
        let result = self
            .engine
            .wait(console, patterns, timeout, self.system.as_ref())
            .await;

        if let Err(Error::Session(SessionError::ConsoleDisconnected { notice })) = &result {
            warn!("{}: '{}', dropping console", self.connector.target(), notice);
            self.drop_console().await;
        }
        result
    }

    /// Forcibly close and forget the current console.
    async fn drop_console(&mut self) {
        self.prompt_ready = false;
        if let Some(mut console) = self.console.take() {
            if let Err(e) = console.terminate().await {
                debug!("{}: terminate failed: {}", console.target(), e);
            }
        }
    }
}
