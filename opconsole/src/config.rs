//! Session settings and whole-console configuration files.
//!
//! All durations are written in milliseconds in TOML (`*_ms` keys).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::transport::TransportDescriptor;

/// Serde adapter for `Duration` stored as integer milliseconds.
pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Timeouts and limits for a console session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Used by waits and commands that don't pass their own timeout.
    #[serde(rename = "default_timeout_ms", with = "duration_millis")]
    pub default_timeout: Duration,

    /// Upper bound on bringing a transport up.
    #[serde(rename = "setup_timeout_ms", with = "duration_millis")]
    pub setup_timeout: Duration,

    /// Opens attempted when a connected console is found dead.
    pub reconnect_attempts: u32,

    /// Pause between reconnect attempts.
    #[serde(rename = "reconnect_delay_ms", with = "duration_millis")]
    pub reconnect_delay: Duration,

    /// How long `close` waits for EOF after the exit sequence.
    #[serde(rename = "close_timeout_ms", with = "duration_millis")]
    pub close_timeout: Duration,

    /// How long a timed-out command gets to return to the prompt after Ctrl-C.
    #[serde(rename = "interrupt_timeout_ms", with = "duration_millis")]
    pub interrupt_timeout: Duration,

    /// Quiet period used to drain stale output before a command.
    #[serde(rename = "settle_timeout_ms", with = "duration_millis")]
    pub settle_timeout: Duration,

    /// Wait for each step of the sentinel prompt setup.
    #[serde(rename = "prompt_timeout_ms", with = "duration_millis")]
    pub prompt_timeout: Duration,

    /// Pause between attempts of `run_command_with_retry`.
    #[serde(rename = "retry_delay_ms", with = "duration_millis")]
    pub retry_delay: Duration,

    /// Look-back, in bytes, when searching newly arrived output.
    pub search_depth: usize,

    /// Extra log capture after a kernel fault.
    #[serde(rename = "kernel_followup_ms", with = "duration_millis")]
    pub kernel_followup: Duration,

    /// Extra log capture after a firmware fault.
    #[serde(rename = "firmware_followup_ms", with = "duration_millis")]
    pub firmware_followup: Duration,

    /// Literal notices meaning the far end dropped the console.
    pub disconnect_notices: Vec<String>,

    /// Terminal columns set on the remote shell.
    pub terminal_cols: u16,

    /// Terminal rows set on the remote shell.
    pub terminal_rows: u16,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            setup_timeout: Duration::from_secs(30),
            reconnect_attempts: 120,
            reconnect_delay: Duration::from_secs(1),
            close_timeout: Duration::from_secs(10),
            interrupt_timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_millis(100),
            prompt_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(2),
            search_depth: 1000,
            kernel_followup: Duration::from_secs(10),
            firmware_followup: Duration::from_secs(5),
            disconnect_notices: vec!["SOL session closed by BMC".to_string()],
            terminal_cols: 300,
            terminal_rows: 30,
        }
    }
}

impl SessionSettings {
    /// Parse settings from TOML; missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s).map_err(ConfigError::from)?)
    }

    /// `timeout` unless it is absent or zero, in which case the default.
    pub fn resolve_timeout(&self, timeout: Option<Duration>) -> Duration {
        match timeout {
            Some(t) if !t.is_zero() => t,
            _ => self.default_timeout,
        }
    }
}

/// A console described in one file: how to reach it and how to drive it.
///
/// ```toml
/// [transport]
/// kind = "ssh"
/// host = "bmc.lab"
/// username = "root"
///
/// [session]
/// default_timeout_ms = 120000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    pub transport: TransportDescriptor,

    #[serde(default)]
    pub session: SessionSettings,
}

impl ConsoleConfig {
    /// Parse a console configuration from TOML.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s).map_err(ConfigError::from)?)
    }

    /// Read and parse a console configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
