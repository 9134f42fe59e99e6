//! In-memory transports and connectors for unit tests.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep_until};

use crate::error::{Result, TransportError};
use crate::transport::{ConsoleTransport, Connector, ReadEvent};

/// Replays fixed output chunks, one per read, then reports EOF.
pub(crate) struct ScriptedTransport {
    chunks: VecDeque<Vec<u8>>,
    hold_open: bool,
    closed: bool,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            hold_open: false,
            closed: false,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Stay open once the script runs out, so reads time out instead.
    pub(crate) fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Everything written to the transport so far.
    pub(crate) fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

#[async_trait]
impl ConsoleTransport for ScriptedTransport {
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadEvent> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(ReadEvent::Data(chunk));
        }
        if self.hold_open && !self.closed {
            sleep_until(deadline).await;
            return Ok(ReadEvent::Timeout);
        }
        self.closed = true;
        Ok(ReadEvent::Eof)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed
    }

    async fn terminate(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn target(&self) -> &str {
        "scripted"
    }
}

/// A tiny line-oriented shell behind a terminal.
///
/// Understands just enough to exercise sessions: `PS1=` assignments,
/// `echo`, `echo $?`, `(exit N)`, `seq N`, `stty`/`export` (ignored) and
/// `exit`. A few commands misbehave on purpose:
///
/// - `hang` produces nothing until Ctrl-C
/// - `wedge` ignores everything, Ctrl-C included
/// - `panic` prints a kernel panic and carries on
/// - `drop-sol` prints the BMC disconnect notice and closes
/// - `flaky` fails the first time it runs
pub(crate) struct FakeShell {
    prompt: String,
    input: Vec<u8>,
    output: VecDeque<Vec<u8>>,
    last_exit: i32,
    hung: bool,
    wedged: bool,
    closed: bool,
    flaky_runs: u32,
    killed: Arc<AtomicBool>,
}

impl FakeShell {
    pub(crate) fn new() -> Self {
        let mut shell = Self {
            prompt: "# ".to_string(),
            input: Vec::new(),
            output: VecDeque::new(),
            last_exit: 0,
            hung: false,
            wedged: false,
            closed: false,
            flaky_runs: 0,
            killed: Arc::new(AtomicBool::new(false)),
        };
        shell.emit(format!("Welcome to the test console\r\n{}", shell.prompt));
        shell
    }

    /// Flag that makes the shell look dead when set.
    pub(crate) fn kill_switch(&self) -> Arc<AtomicBool> {
        self.killed.clone()
    }

    fn emit(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.output.push_back(text.into_bytes());
        }
    }

    fn run_line(&mut self, line: &str) {
        let mut out = format!("{line}\r\n");
        for command in line.split(';').map(str::trim) {
            if self.run_one(command, &mut out) {
                self.emit(out);
                return;
            }
        }
        out.push_str(&self.prompt);
        self.emit(out);
    }

    /// Run one command, appending its output. Returns true if the shell
    /// stops responding after it.
    fn run_one(&mut self, command: &str, out: &mut String) -> bool {
        let mut exit = 0;
        if command.is_empty() {
            return false;
        } else if let Some(value) = command.strip_prefix("PS1=") {
            self.prompt = value.replace('\'', "");
        } else if command == "echo $?" {
            out.push_str(&format!("{}\r\n", self.last_exit));
        } else if let Some(text) = command.strip_prefix("echo ") {
            out.push_str(&format!("{text}\r\n"));
        } else if let Some(code) = command
            .strip_prefix("(exit ")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            exit = code.trim().parse().unwrap_or(2);
        } else if let Some(n) = command.strip_prefix("seq ") {
            for i in 1..=n.trim().parse::<u32>().unwrap_or(0) {
                out.push_str(&format!("{i}\r\n"));
            }
        } else if command.starts_with("stty ") || command.starts_with("export ") {
            // accepted silently
        } else if command == "exit" || command == "logout" {
            self.closed = true;
            return true;
        } else if command == "hang" {
            self.hung = true;
            return true;
        } else if command == "wedge" {
            self.wedged = true;
            return true;
        } else if command == "panic" {
            out.push_str("Kernel panic - not syncing: Fatal exception\r\n");
        } else if command == "drop-sol" {
            out.push_str("SOL session closed by BMC\r\n");
            self.closed = true;
            return true;
        } else if command == "flaky" {
            self.flaky_runs += 1;
            if self.flaky_runs == 1 {
                out.push_str("not yet\r\n");
                exit = 1;
            } else {
                out.push_str("ok\r\n");
            }
        } else {
            let name = command.split_whitespace().next().unwrap_or(command);
            out.push_str(&format!("sh: {name}: not found\r\n"));
            exit = 127;
        }
        self.last_exit = exit;
        false
    }
}

#[async_trait]
impl ConsoleTransport for FakeShell {
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadEvent> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(ReadEvent::Eof);
        }
        if let Some(chunk) = self.output.pop_front() {
            return Ok(ReadEvent::Data(chunk));
        }
        if self.closed {
            return Ok(ReadEvent::Eof);
        }
        sleep_until(deadline).await;
        Ok(ReadEvent::Timeout)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed || self.killed.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected.into());
        }
        for &byte in data {
            if self.wedged {
                continue;
            }
            if byte == 0x03 {
                if self.hung {
                    self.hung = false;
                    self.last_exit = 130;
                    let prompt = self.prompt.clone();
                    self.emit(format!("^C\r\n{prompt}"));
                }
                continue;
            }
            if self.hung {
                continue;
            }
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&self.input).into_owned();
                self.input.clear();
                self.run_line(line.trim_end_matches('\r'));
            } else {
                self.input.push(byte);
            }
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.closed && !self.killed.load(Ordering::SeqCst)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn target(&self) -> &str {
        "fake-shell"
    }
}

/// Connector handing out [`FakeShell`]s and counting open attempts.
pub(crate) struct CountingConnector {
    opens: Arc<AtomicU32>,
    /// Opens after this many fail.
    healthy_opens: u32,
    hang: bool,
    prompt_on_connect: bool,
    setup_bound: Option<Duration>,
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl CountingConnector {
    pub(crate) fn new() -> Self {
        Self {
            opens: Arc::new(AtomicU32::new(0)),
            healthy_opens: u32::MAX,
            hang: false,
            prompt_on_connect: true,
            setup_bound: None,
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn healthy_opens(mut self, n: u32) -> Self {
        self.healthy_opens = n;
        self
    }

    /// Every open blocks forever.
    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub(crate) fn prompt_on_connect(mut self, enabled: bool) -> Self {
        self.prompt_on_connect = enabled;
        self
    }

    pub(crate) fn setup_bound(mut self, bound: Duration) -> Self {
        self.setup_bound = Some(bound);
        self
    }

    pub(crate) fn opens(&self) -> Arc<AtomicU32> {
        self.opens.clone()
    }

    /// Handle that kills whichever shell was opened last.
    pub(crate) fn killer(&self) -> ShellKiller {
        ShellKiller {
            current: self.current.clone(),
        }
    }
}

pub(crate) struct ShellKiller {
    current: Arc<Mutex<Option<Arc<AtomicBool>>>>,
}

impl ShellKiller {
    pub(crate) fn kill(&self) {
        if let Some(flag) = self.current.lock().unwrap().as_ref() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn open(&self) -> Result<Box<dyn ConsoleTransport>> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang {
            pending::<()>().await;
        }
        if n > self.healthy_opens {
            return Err(TransportError::SetupFailed {
                target: self.target(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        let shell = FakeShell::new();
        *self.current.lock().unwrap() = Some(shell.kill_switch());
        Ok(Box::new(shell))
    }

    fn target(&self) -> String {
        "fake-shell".to_string()
    }

    fn prompt_on_connect(&self) -> bool {
        self.prompt_on_connect
    }

    fn setup_bound(&self) -> Option<Duration> {
        self.setup_bound
    }
}
