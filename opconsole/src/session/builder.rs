//! Builder for creating console sessions.

use std::sync::Arc;
use std::time::Duration;

use super::Session;
use crate::config::{ConsoleConfig, SessionSettings};
use crate::error::{Result, SessionError};
use crate::system::SystemHandle;
use crate::transport::Connector;

/// Builder for constructing console sessions.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use opconsole::{SessionBuilder, SshConfig, SystemHandle, TransportDescriptor};
///
/// # fn example() -> Result<(), opconsole::Error> {
/// let descriptor = TransportDescriptor::Ssh(SshConfig::new("bmc.lab", "root"));
/// let session = SessionBuilder::new(descriptor)
///     .default_timeout(Duration::from_secs(120))
///     .system(SystemHandle::default())
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    connector: Arc<dyn Connector>,
    settings: SessionSettings,
    system: Option<SystemHandle>,
}

impl SessionBuilder {
    /// Create a builder for the console reached through `connector`.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::from_connector(Arc::new(connector))
    }

    /// Create a builder sharing an existing connector.
    pub fn from_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            settings: SessionSettings::default(),
            system: None,
        }
    }

    /// Create a builder from a parsed console configuration.
    pub fn from_config(config: ConsoleConfig) -> Self {
        Self::new(config.transport).settings(config.session)
    }

    /// Replace all settings.
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the timeout for waits and commands that don't pass one.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.settings.default_timeout = timeout;
        self
    }

    /// Set the bound on bringing the transport up.
    pub fn setup_timeout(mut self, timeout: Duration) -> Self {
        self.settings.setup_timeout = timeout;
        self
    }

    /// Set how many times, and how far apart, a dead console is reopened.
    pub fn reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.settings.reconnect_attempts = attempts;
        self.settings.reconnect_delay = delay;
        self
    }

    /// Watch for another disconnect notice.
    pub fn disconnect_notice(mut self, notice: impl Into<String>) -> Self {
        self.settings.disconnect_notices.push(notice.into());
        self
    }

    /// Attach the shared system state.
    pub fn system(mut self, system: SystemHandle) -> Self {
        self.system = Some(system);
        self
    }

    /// Build the session.
    ///
    /// This creates the session but does not connect. Call `connect()` on
    /// the returned session, or just run a command.
    pub fn build(self) -> Result<Session> {
        if self.settings.reconnect_attempts == 0 {
            return Err(SessionError::InvalidConfig {
                message: "reconnect_attempts must be at least 1".to_string(),
            }
            .into());
        }
        if self.settings.search_depth == 0 {
            return Err(SessionError::InvalidConfig {
                message: "search_depth must be non-zero".to_string(),
            }
            .into());
        }
        if self.settings.disconnect_notices.iter().any(String::is_empty) {
            return Err(SessionError::InvalidConfig {
                message: "disconnect notices must not be empty".to_string(),
            }
            .into());
        }

        let mut session = Session::new(self.connector, self.settings);
        if let Some(system) = self.system {
            session.set_system(system);
        }
        Ok(session)
    }
}
