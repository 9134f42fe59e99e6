//! Local process transport on a pseudo-terminal.
//!
//! Console emulators (simulators, hypervisors) behave differently when their
//! stdio is not a terminal, so the child always gets a real PTY. Blocking PTY
//! I/O is bridged to async via a reader thread and a writer thread.

use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::Instant;

use super::config::LocalProcessConfig;
use super::{ConsoleTransport, ReadEvent};
use crate::error::{Result, TransportError};

/// Child process attached to a pseudo-terminal.
pub struct LocalTransport {
    target: String,
    child: Box<dyn Child + Send + Sync>,
    /// Held so the PTY stays open for the lifetime of the transport.
    _master: Box<dyn MasterPty + Send>,
    output: UnboundedReceiver<Vec<u8>>,
    input: Option<std_mpsc::Sender<Vec<u8>>>,
    exit_sequence: Vec<u8>,
    eof: bool,
}

impl LocalTransport {
    /// Spawn the configured program on a fresh PTY.
    pub fn spawn(config: &LocalProcessConfig) -> Result<Self> {
        let target = config.target();
        let setup_failed = |reason: String| TransportError::SetupFailed {
            target: target.clone(),
            reason,
        };

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.terminal_height,
                cols: config.terminal_width,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| setup_failed(format!("openpty: {e}")))?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &config.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| setup_failed(format!("spawn: {e}")))?;
        // Drop our copy of the slave so EOF is seen once the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| setup_failed(format!("clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| setup_failed(format!("take writer: {e}")))?;

        debug!("{}: spawned pid {:?}", target, child.process_id());

        let output = spawn_reader(reader, target.clone());
        let input = spawn_writer(writer, target.clone());

        Ok(Self {
            exit_sequence: config
                .exit_sequence
                .clone()
                .unwrap_or_else(|| "exit\n".to_string())
                .into_bytes(),
            target,
            child,
            _master: pair.master,
            output,
            input: Some(input),
            eof: false,
        })
    }
}

/// Reader thread: forward PTY output to an async channel until EOF.
fn spawn_reader(mut reader: Box<dyn Read + Send>, target: String) -> UnboundedReceiver<Vec<u8>> {
    let (tx, rx) = unbounded_channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO is how Linux reports a PTY whose child has exited
                    debug!("{}: PTY read ended: {}", target, e);
                    break;
                }
            }
        }
        debug!("{}: PTY reader thread exiting", target);
    });
    rx
}

/// Writer thread: drain queued input into the PTY master.
fn spawn_writer(mut writer: Box<dyn Write + Send>, target: String) -> std_mpsc::Sender<Vec<u8>> {
    let (tx, rx) = std_mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        while let Ok(data) = rx.recv() {
            if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                warn!("{}: PTY write failed: {}", target, e);
                break;
            }
        }
        debug!("{}: PTY writer thread exiting", target);
    });
    tx
}

#[async_trait]
impl ConsoleTransport for LocalTransport {
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadEvent> {
        if self.eof {
            return Ok(ReadEvent::Eof);
        }
        match tokio::time::timeout_at(deadline, self.output.recv()).await {
            Ok(Some(data)) => Ok(ReadEvent::Data(data)),
            Ok(None) => {
                self.eof = true;
                Ok(ReadEvent::Eof)
            }
            Err(_) => Ok(ReadEvent::Timeout),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let input = self.input.as_ref().ok_or(TransportError::Disconnected)?;
        input
            .send(data.to_vec())
            .map_err(|_| TransportError::Disconnected)?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        !self.eof && matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.input = None;
        self.eof = true;

        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }
        if let Err(e) = self.child.kill() {
            debug!("{}: kill failed: {}", self.target, e);
        }
        // Reap without blocking the runtime.
        for _ in 0..20 {
            if !matches!(self.child.try_wait(), Ok(None)) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        warn!("{}: child did not exit after kill", self.target);
        Ok(())
    }

    fn exit_sequence(&self) -> &[u8] {
        &self.exit_sequence
    }

    fn target(&self) -> &str {
        &self.target
    }
}
