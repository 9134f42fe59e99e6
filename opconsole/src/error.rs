//! Error types for opconsole.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::fault::Fault;

/// Main error type for opconsole operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (spawn, SSH, virtual terminal)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A baseline failure signature was seen on the console
    #[error("{0}")]
    Fault(#[from] Fault),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns the fault if this error is a classified console fault.
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            Error::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Whether this error is a classified console fault.
    pub fn is_fault(&self) -> bool {
        self.as_fault().is_some()
    }

    /// Returns `(output, exit_code)` if this error is a failed command.
    pub fn command_failed(&self) -> Option<(&[String], i32)> {
        match self {
            Error::Session(SessionError::CommandFailed {
                output, exit_code, ..
            }) => Some((output.as_slice(), *exit_code)),
            _ => None,
        }
    }
}

/// Transport layer errors (process spawn, SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport could not be brought up
    #[error("Transport setup failed for {target}: {reason}")]
    SetupFailed { target: String, reason: String },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host not present in known_hosts while in strict mode
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// The console stopped responding and could not be interrupted
    #[error("Console unresponsive while running '{command}'")]
    Unresponsive { command: String },
}

/// Channel layer errors (pattern matching, stream reads).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Pattern matching timed out
    #[error("Pattern not found within {0:?}")]
    PatternTimeout(Duration),

    /// Stream reached EOF before any pattern matched
    #[error("Channel closed")]
    Closed,

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Session layer errors (lifecycle, command execution).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not connected
    #[error("Session not connected - call connect() first")]
    NotConnected,

    /// Session already connected
    #[error("Session already connected")]
    AlreadyConnected,

    /// The console could not be re-established
    #[error("Console {target} unavailable after {attempts} reconnect attempts")]
    ConsoleUnavailable { target: String, attempts: u32 },

    /// The far end announced that the console was disconnected
    #[error("Console disconnected due to '{notice}'")]
    ConsoleDisconnected { notice: String },

    /// Command ran to completion with a non-zero exit code, or was interrupted
    #[error("Command '{command}' exited with '{exit_code}'.\nOutput\n{}", output.join("\n"))]
    CommandFailed {
        command: String,
        output: Vec<String>,
        exit_code: i32,
    },

    /// The sentinel prompt could not be established on the remote shell
    #[error("Setting the shell prompt failed: {message}")]
    PromptSetup { message: String },

    /// Invalid configuration in the session builder
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// TOML could not be parsed into the expected shape
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Result type alias using opconsole's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultKind;
    use crate::system::SystemState;

    #[test]
    fn test_command_failed_display() {
        let err = SessionError::CommandFailed {
            command: "false".to_string(),
            output: vec!["a".to_string(), "b".to_string()],
            exit_code: 1,
        };
        assert_eq!(err.to_string(), "Command 'false' exited with '1'.\nOutput\na\nb");
    }

    #[test]
    fn test_command_failed_helper() {
        let err: Error = SessionError::CommandFailed {
            command: "exit 7".to_string(),
            output: vec![],
            exit_code: 7,
        }
        .into();
        assert_eq!(err.command_failed().map(|(_, code)| code), Some(7));
        assert!(!err.is_fault());
    }

    #[test]
    fn test_fault_helper() {
        let err: Error = Fault::new(FaultKind::KernelPanic, Some(SystemState::Os), "oops").into();
        assert_eq!(err.as_fault().map(|f| f.kind), Some(FaultKind::KernelPanic));
        assert!(err.command_failed().is_none());
    }
}
