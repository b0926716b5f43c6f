//! Where emitted programs go: the live runtime process, or any writer.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tracing::{debug, info, warn};

use crate::error::AppError;

/// Pause between lines sent to an interactive runtime.
pub const LINE_DELAY: Duration = Duration::from_millis(30);

/// Consumer of safety-proven program text.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Send `text` in order, unmodified, one instruction per line.
    async fn send(&self, text: &str) -> Result<(), AppError>;

    fn is_alive(&self) -> bool;
}

fn sink_err(e: impl std::fmt::Display) -> AppError {
    AppError::Sink {
        message: e.to_string(),
    }
}

/// Write each non-empty line followed by `\n`, then one blank line.
async fn write_framed<W: AsyncWrite + Unpin + Send>(
    writer: &mut W,
    text: &str,
    delay: Duration,
) -> std::io::Result<()> {
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    writer.write_all(b"\n").await?;
    writer.flush().await
}

// ── Process sink ─────────────────────────────────────────────────

/// A long-lived runtime process fed through its stdin.
pub struct ProcessSink {
    child: parking_lot::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
}

impl ProcessSink {
    /// Spawn `command` (program followed by arguments) with piped stdio.
    /// Output lines are forwarded to the log.
    pub fn spawn(command: &[String], cwd: Option<&Path>) -> Result<Self, AppError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| sink_err("runtime command is empty"))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| sink_err(format!("failed to spawn runtime `{program}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| sink_err("failed to capture runtime stdin"))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "runtime", stream = "stdout", "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "runtime", stream = "stderr", "{line}");
                }
            });
        }

        info!(program = %program, "runtime process started");
        Ok(Self {
            child: parking_lot::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
        })
    }

    /// Kill the runtime process.
    pub fn shutdown(&self) {
        if let Err(e) = self.child.lock().start_kill() {
            debug!("runtime already stopped: {e}");
        }
    }
}

#[async_trait]
impl ExecutionSink for ProcessSink {
    async fn send(&self, text: &str) -> Result<(), AppError> {
        if !self.is_alive() {
            return Err(sink_err("runtime is not running"));
        }
        let mut stdin = self.stdin.lock().await;
        write_framed(&mut *stdin, text, LINE_DELAY)
            .await
            .map_err(sink_err)?;
        debug!(lines = text.lines().count(), "sent program to runtime");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }
}

// ── Writer sink ──────────────────────────────────────────────────

/// Writes the same framing into any async writer (stdout, buffers).
pub struct WriterSink<W> {
    writer: tokio::sync::Mutex<W>,
    delay: Duration,
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ExecutionSink for WriterSink<W> {
    async fn send(&self, text: &str) -> Result<(), AppError> {
        let mut writer = self.writer.lock().await;
        write_framed(&mut *writer, text, self.delay)
            .await
            .map_err(sink_err)
    }

    fn is_alive(&self) -> bool {
        true
    }
}
