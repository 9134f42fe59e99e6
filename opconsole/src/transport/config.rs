//! Transport descriptors: immutable configuration for reaching a console.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::duration_millis;

/// How to reach a console. Created once per test run, never mutated.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportDescriptor {
    /// A local process (simulator, hypervisor) on a pseudo-terminal.
    Local(LocalProcessConfig),

    /// An interactive SSH shell.
    Ssh(SshConfig),

    /// A partition console opened through a management console.
    VirtualTerminal(VirtualTerminalConfig),
}

impl TransportDescriptor {
    /// Human-readable endpoint name.
    pub fn target(&self) -> String {
        match self {
            TransportDescriptor::Local(config) => config.target(),
            TransportDescriptor::Ssh(config) => config.target(),
            TransportDescriptor::VirtualTerminal(config) => config.target(),
        }
    }
}

/// Local process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalProcessConfig {
    /// Program to run.
    pub program: PathBuf,

    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides, applied in order.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Working directory for the child.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Keystrokes that make the program exit, e.g. `"\u0001x"` for a
    /// simulator's escape-and-quit. Defaults to `exit`.
    #[serde(default)]
    pub exit_sequence: Option<String>,

    /// Terminal width for the PTY.
    #[serde(default = "default_terminal_width")]
    pub terminal_width: u16,

    /// Terminal height for the PTY.
    #[serde(default = "default_terminal_height")]
    pub terminal_height: u16,
}

impl LocalProcessConfig {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: IndexMap::new(),
            cwd: None,
            exit_sequence: None,
            terminal_width: default_terminal_width(),
            terminal_height: default_terminal_height(),
        }
    }

    /// Human-readable endpoint name.
    pub fn target(&self) -> String {
        format!("local:{}", self.program.display())
    }
}

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. Lab machines get reinstalled
    /// constantly, so this is common for test consoles.
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    #[serde(default)]
    pub auth: AuthMethod,

    /// Connection timeout, also used as the inactivity timeout.
    #[serde(
        default = "default_connect_timeout",
        rename = "timeout_ms",
        with = "duration_millis"
    )]
    pub timeout: Duration,

    /// Terminal width for PTY.
    #[serde(default = "default_ssh_terminal_width")]
    pub terminal_width: u32,

    /// Terminal height for PTY.
    #[serde(default = "default_ssh_terminal_height")]
    pub terminal_height: u32,

    /// Host key verification mode.
    #[serde(default)]
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Configuration with defaults for everything but host and user.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            username: username.into(),
            auth: AuthMethod::None,
            timeout: default_connect_timeout(),
            terminal_width: default_ssh_terminal_width(),
            terminal_height: default_ssh_terminal_height(),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Human-readable endpoint name.
    pub fn target(&self) -> String {
        format!("ssh:{}@{}", self.username, self.socket_addr())
    }
}

/// Authentication method for SSH connections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// No authentication (for testing only).
    #[default]
    None,

    /// Password authentication.
    Password { password: SecretString },

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        #[serde(default)]
        passphrase: Option<SecretString>,
    },
}

/// Partition console reached through a management console's `mkvterm`.
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualTerminalConfig {
    /// SSH access to the management console.
    pub console: SshConfig,

    /// Managed system the partition lives on.
    pub managed_system: String,

    /// Target partition name.
    pub partition: String,

    /// How long to wait for the terminal to open.
    #[serde(
        default = "default_vterm_open_timeout",
        rename = "open_timeout_ms",
        with = "duration_millis"
    )]
    pub open_timeout: Duration,
}

impl VirtualTerminalConfig {
    /// Configuration with the default open timeout.
    pub fn new(
        console: SshConfig,
        managed_system: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            console,
            managed_system: managed_system.into(),
            partition: partition.into(),
            open_timeout: default_vterm_open_timeout(),
        }
    }

    /// Human-readable endpoint name.
    pub fn target(&self) -> String {
        format!(
            "vterm:{}/{}/{}",
            self.console.host, self.managed_system, self.partition
        )
    }

    /// Shell line that drops any stale terminal and opens a new one.
    pub fn open_command(&self) -> String {
        format!(
            "rmvterm -m {system} -p {partition} >/dev/null 2>&1; mkvterm -m {system} -p {partition}",
            system = self.managed_system,
            partition = self.partition
        )
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_vterm_open_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_terminal_width() -> u16 {
    300
}

fn default_terminal_height() -> u16 {
    30
}

fn default_ssh_terminal_width() -> u32 {
    511
}

fn default_ssh_terminal_height() -> u32 {
    24
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_ssh_descriptor_from_toml() {
        let descriptor: TransportDescriptor = toml::from_str(
            r#"
            kind = "ssh"
            host = "bmc.lab"
            username = "root"
            timeout_ms = 5000
            host_key_verification = "disabled"
            auth = { method = "password", password = "0penBmc" }
            "#,
        )
        .unwrap();

        let TransportDescriptor::Ssh(config) = descriptor else {
            panic!("expected ssh descriptor");
        };
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(matches!(config.host_key_verification, HostKeyVerification::Disabled));
        let AuthMethod::Password { password } = &config.auth else {
            panic!("expected password auth");
        };
        assert_eq!(password.expose_secret(), "0penBmc");
        assert_eq!(config.target(), "ssh:root@bmc.lab:22");
    }

    #[test]
    fn test_local_descriptor_keeps_env_order() {
        let descriptor: TransportDescriptor = toml::from_str(
            r#"
            kind = "local"
            program = "/usr/bin/qemu-system-ppc64"
            args = ["-machine", "powernv", "-nographic"]
            exit_sequence = "\u0001x"

            [env]
            ZZZ = "1"
            AAA = "2"
            "#,
        )
        .unwrap();

        let TransportDescriptor::Local(config) = descriptor else {
            panic!("expected local descriptor");
        };
        let keys: Vec<_> = config.env.keys().cloned().collect();
        assert_eq!(keys, ["ZZZ", "AAA"]);
        assert_eq!(config.exit_sequence.as_deref(), Some("\u{1}x"));
        assert_eq!(config.terminal_width, 300);
    }

    #[test]
    fn test_vterm_open_command() {
        let config = VirtualTerminalConfig::new(SshConfig::new("hmc", "hscroot"), "Server-1", "lpar2");
        assert_eq!(
            config.open_command(),
            "rmvterm -m Server-1 -p lpar2 >/dev/null 2>&1; mkvterm -m Server-1 -p lpar2"
        );
        assert_eq!(config.target(), "vterm:hmc/Server-1/lpar2");
    }
}
