//! Shell commands framed by a unique prompt sentinel.
//!
//! Each connection gets its own prompt, `[console-expect-<8 hex>]#`. It is
//! assigned as `PS1='[console-expect-<hex>]''#'` so that the terminal echo
//! of the assignment never contains the sentinel itself. A command is sent,
//! the sentinel awaited, then `echo $?` recovers its exit code.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use uuid::Uuid;

use super::Session;
use crate::channel::{Pattern, PatternSet, WaitOutcome};
use crate::error::{Error, Result, SessionError, TransportError};

/// Output of a command that ran to completion with exit code 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command that was executed.
    pub command: String,

    /// Output lines, without the echoed command or the trailing prompt.
    pub lines: Vec<String>,

    /// Exit code reported by the shell.
    pub exit_code: i32,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn new(
        command: impl Into<String>,
        lines: Vec<String>,
        exit_code: i32,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            lines,
            exit_code,
            elapsed,
        }
    }

    /// Check if any output line contains `pattern`.
    pub fn contains(&self, pattern: &str) -> bool {
        self.lines.iter().any(|line| line.contains(pattern))
    }

    /// Output joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A fresh prompt sentinel.
pub(crate) fn new_sentinel() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("[console-expect-{}]#", &id[..8])
}

/// `PS1` assignment for `sentinel` that does not echo the sentinel.
pub(crate) fn ps1_assignment(sentinel: &str) -> String {
    let body = sentinel.trim_end_matches('#');
    format!("PS1='{body}''#'")
}

/// Split captured text into lines, dropping the echoed command line.
pub(crate) fn output_lines(before: &str) -> Vec<String> {
    before
        .replace("\r\r\n", "\n")
        .replace("\r\n", "\n")
        .lines()
        .skip(1)
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

/// Exit code from the output of `echo $?`; `-1` if it can't be read.
pub(crate) fn parse_exit_code(before: &str) -> i32 {
    output_lines(before)
        .last()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(-1)
}

impl Session {
    /// Run `command` in the console's shell and capture its output.
    ///
    /// The console is (re)connected and the sentinel prompt set up first if
    /// needed. `timeout` bounds each of the two waits (command, then exit
    /// code probe); `None` or zero means the session default.
    ///
    /// # Errors
    ///
    /// - [`SessionError::CommandFailed`] for a non-zero exit code, or with
    ///   output `["TIMEOUT"]` and code `-1` if the command timed out and
    ///   Ctrl-C brought the prompt back.
    /// - [`TransportError::Unresponsive`] if it timed out and Ctrl-C did not
    ///   help; the session is disconnected.
    /// - [`TransportError::Disconnected`] if the stream closed mid-command.
    /// - A [`Fault`](crate::fault::Fault) if a failure signature appeared.
    pub async fn run_command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let timeout = self.settings.resolve_timeout(timeout);
        self.ensure_live().await?;
        self.ensure_prompt().await?;
        self.settle().await?;

        let start = Instant::now();
        info!("{}: run '{}'", self.connector.target(), command);

        self.send_line(command).await?;
        let output = self.wait_prompt(command, timeout).await?;

        self.send_line("echo $?").await?;
        let status = self.wait_prompt(command, timeout).await?;

        let lines = output_lines(&output);
        let exit_code = parse_exit_code(&status);
        debug!(
            "{}: '{}' exited with {} ({} lines)",
            self.connector.target(),
            command,
            exit_code,
            lines.len()
        );

        if exit_code != 0 {
            return Err(SessionError::CommandFailed {
                command: command.to_string(),
                output: lines,
                exit_code,
            }
            .into());
        }

        Ok(CommandOutput::new(command, lines, exit_code, start.elapsed()))
    }

    /// [`run_command`](Self::run_command), retried up to `retries` more times
    /// while it fails with [`SessionError::CommandFailed`].
    pub async fn run_command_with_retry(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        retries: u32,
    ) -> Result<CommandOutput> {
        let mut attempt = 0;
        loop {
            match self.run_command(command, timeout).await {
                Err(e) if e.command_failed().is_some() && attempt < retries => {
                    attempt += 1;
                    info!(
                        "{}: '{}' failed, retry {} of {}",
                        self.connector.target(),
                        command,
                        attempt,
                        retries
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    /// Output lines of `command` whatever its exit code.
    ///
    /// Errors other than [`SessionError::CommandFailed`] still propagate.
    pub async fn run_command_ignore_fail(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        match self.run_command(command, timeout).await {
            Ok(output) => Ok(output.lines),
            Err(Error::Session(SessionError::CommandFailed { output, .. })) => Ok(output),
            Err(e) => Err(e),
        }
    }

    /// Set up the sentinel prompt unless already done on this connection.
    pub(crate) async fn ensure_prompt(&mut self) -> Result<()> {
        if self.prompt_ready {
            return Ok(());
        }

        debug!("{}: setting prompt {}", self.connector.target(), self.sentinel);
        let ps1 = ps1_assignment(&self.sentinel);
        self.send_line(&ps1).await?;
        self.expect_setup_prompt("PS1").await?;

        let terminal = format!(
            "stty cols {}; stty rows {}; export LANG=C",
            self.settings.terminal_cols, self.settings.terminal_rows
        );
        self.send_line(&terminal).await?;
        self.expect_setup_prompt("terminal setup").await?;

        self.prompt_ready = true;
        Ok(())
    }

    async fn expect_setup_prompt(&mut self, step: &str) -> Result<()> {
        let prompt = self.sentinel_pattern();
        let timeout = self.settings.prompt_timeout;
        match self.expect(&prompt, timeout).await? {
            WaitOutcome::Matched(_) => Ok(()),
            WaitOutcome::Timeout { before } => Err(SessionError::PromptSetup {
                message: format!("no prompt after {step} within {timeout:?}: {}", before.trim()),
            }
            .into()),
            WaitOutcome::Eof { .. } => {
                self.drop_console().await;
                Err(SessionError::PromptSetup {
                    message: format!("console closed during {step}"),
                }
                .into())
            }
        }
    }

    /// Drain stale output, still checking it for failure signatures.
    async fn settle(&mut self) -> Result<()> {
        let timeout = self.settings.settle_timeout;
        match self.expect(&PatternSet::default(), timeout).await? {
            WaitOutcome::Eof { .. } => {
                self.drop_console().await;
                Err(TransportError::Disconnected.into())
            }
            _ => {
                if let Some(console) = self.console.as_mut() {
                    console.clear_buffer();
                }
                Ok(())
            }
        }
    }

    /// Wait for the sentinel, returning the text ahead of it.
    async fn wait_prompt(&mut self, command: &str, timeout: Duration) -> Result<String> {
        let prompt = self.sentinel_pattern();
        match self.expect(&prompt, timeout).await? {
            WaitOutcome::Matched(m) => Ok(m.before),
            WaitOutcome::Timeout { .. } => Err(self.interrupt(command, &prompt).await),
            WaitOutcome::Eof { .. } => {
                warn!("{}: console closed during '{}'", self.connector.target(), command);
                self.drop_console().await;
                Err(TransportError::Disconnected.into())
            }
        }
    }

    /// Ctrl-C a timed-out command and see whether the prompt comes back.
    async fn interrupt(&mut self, command: &str, prompt: &PatternSet) -> Error {
        warn!(
            "{}: '{}' timed out, sending Ctrl-C",
            self.connector.target(),
            command
        );
        if let Err(e) = self.send_control('c').await {
            return e;
        }

        match self.expect(prompt, self.settings.interrupt_timeout).await {
            Ok(WaitOutcome::Matched(_)) => SessionError::CommandFailed {
                command: command.to_string(),
                output: vec!["TIMEOUT".to_string()],
                exit_code: -1,
            }
            .into(),
            Ok(_) => {
                warn!(
                    "{}: no prompt after Ctrl-C, dropping console",
                    self.connector.target()
                );
                self.drop_console().await;
                TransportError::Unresponsive {
                    command: command.to_string(),
                }
                .into()
            }
            Err(e) => e,
        }
    }

    fn sentinel_pattern(&self) -> PatternSet {
        PatternSet::from(Pattern::literal(&self.sentinel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::fault::FaultKind;
    use crate::session::{SessionBuilder, SessionState};
    use crate::system::{SystemHandle, SystemState};
    use crate::testing::CountingConnector;

    fn session() -> Session {
        let _ = env_logger::builder().is_test(true).try_init();
        SessionBuilder::new(CountingConnector::new()).build().unwrap()
    }

    #[test]
    fn test_sentinel_is_not_echoed() {
        let sentinel = new_sentinel();
        assert!(sentinel.starts_with("[console-expect-"));
        assert!(sentinel.ends_with("]#"));
        assert_eq!(sentinel.len(), "[console-expect-]#".len() + 8);
        let ps1 = ps1_assignment(&sentinel);
        assert!(!ps1.contains(&sentinel));
        assert_eq!(ps1.replace('\'', ""), format!("PS1={sentinel}"));
    }

    #[test]
    fn test_output_lines() {
        assert_eq!(
            output_lines("ls /\r\r\nbin\r\nboot\r\n"),
            ["bin".to_string(), "boot".to_string()]
        );
        assert!(output_lines("true\r\n").is_empty());
        assert!(output_lines("").is_empty());
    }

    #[test]
    fn test_parse_exit_code() {
        assert_eq!(parse_exit_code("echo $?\r\n0\r\n"), 0);
        assert_eq!(parse_exit_code("echo $?\r\n127\r\n"), 127);
        assert_eq!(parse_exit_code("echo $?\r\ngarbage\r\n"), -1);
        assert_eq!(parse_exit_code("echo $?\r\n"), -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_round_trip() {
        let mut session = session();
        let output = session.run_command("echo hello", None).await.unwrap();
        assert_eq!(output.lines, ["hello"]);
        assert_eq!(output.exit_code, 0);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multi_line_output() {
        let mut session = session();
        let output = session.run_command("seq 3", None).await.unwrap();
        assert_eq!(output.lines, ["1", "2", "3"]);
        assert_eq!(output.text(), "1\n2\n3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_zero_exit_is_command_failed() {
        let mut session = session();
        let err = session.run_command("(exit 7)", None).await.unwrap_err();
        let (output, code) = err.command_failed().unwrap();
        assert_eq!(code, 7);
        assert!(output.is_empty());

        let output = session.run_command("echo still here", None).await.unwrap();
        assert_eq!(output.lines, ["still here"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_deferred_until_first_command() {
        let mut session = SessionBuilder::new(CountingConnector::new().prompt_on_connect(false))
            .build()
            .unwrap();
        session.connect().await.unwrap();
        assert!(!session.prompt_ready);
        session.run_command("echo hi", None).await.unwrap();
        assert!(session.prompt_ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_recovered_by_interrupt() {
        let mut session = session();
        let err = session
            .run_command("hang", Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        let (output, code) = err.command_failed().unwrap();
        assert_eq!(output, ["TIMEOUT"]);
        assert_eq!(code, -1);
        assert_eq!(session.state(), SessionState::Connected);

        let output = session.run_command("echo recovered", None).await.unwrap();
        assert_eq!(output.lines, ["recovered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_console_is_dropped() {
        let mut session = session();
        let err = session
            .run_command("wedge", Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Unresponsive { ref command }) if command == "wedge"
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_mid_command() {
        let mut session = session();
        let err = session.run_command("exit", None).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Disconnected)));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_during_command() {
        let system = SystemHandle::new(SystemState::Os);
        let mut session = SessionBuilder::new(CountingConnector::new())
            .system(system.clone())
            .build()
            .unwrap();
        let err = session.run_command("panic", None).await.unwrap_err();
        let fault = err.as_fault().unwrap();
        assert_eq!(fault.kind, FaultKind::KernelPanic);
        assert_eq!(fault.state, Some(SystemState::Os));
        assert_eq!(system.state(), SystemState::Unknown);
        // Faults leave the connection alone.
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notice_during_command() {
        let mut session = session();
        let err = session.run_command("drop-sol", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::ConsoleDisconnected { .. })
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_command_failed() {
        let mut settings = SessionSettings::default();
        settings.retry_delay = Duration::from_secs(2);
        let mut session = SessionBuilder::new(CountingConnector::new())
            .settings(settings)
            .build()
            .unwrap();
        let output = session.run_command_with_retry("flaky", None, 1).await.unwrap();
        assert_eq!(output.lines, ["ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let mut session = session();
        let err = session
            .run_command_with_retry("(exit 3)", None, 2)
            .await
            .unwrap_err();
        assert_eq!(err.command_failed().map(|(_, code)| code), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignore_fail_returns_output() {
        let mut session = session();
        let lines = session
            .run_command_ignore_fail("echo partial; (exit 4)", None)
            .await
            .unwrap();
        assert_eq!(lines, ["partial"]);
    }
}
