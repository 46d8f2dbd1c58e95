//! Backend process ownership: spawning, pipe I/O and shutdown.
//!
//! A `ProcessSession` owns the child process together with its stdin writer
//! and stdout reader. Every OS handle it acquires is released by `close()` or,
//! failing that, by `Drop`, so a backend can never outlive its session.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::IpcError;

/// Size of a single stdout read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long `close()` waits for the backend to exit on its own before
/// killing it.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;
type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// What to do with a backend's stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Discard stderr.
    #[default]
    Null,
    /// Share the host's stderr.
    Inherit,
    /// Capture stderr and forward each line to the debug log.
    Piped,
}

impl StderrMode {
    fn stdio(self) -> Stdio {
        match self {
            StderrMode::Null => Stdio::null(),
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Piped => Stdio::piped(),
        }
    }
}

/// Executable plus fixed argument list for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stderr: StderrMode,
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stderr: StderrMode::default(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stderr(mut self, mode: StderrMode) -> Self {
        self.stderr = mode;
        self
    }
}

/// Result of a single stdout read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Vec<u8>),
    /// The backend closed its stdout.
    Eof,
}

/// A spawned backend process and its pipes.
pub struct ProcessSession {
    label: String,
    writer: Option<PipeWriter>,
    reader: Option<PipeReader>,
    child: Option<Child>,
    read_buf: Vec<u8>,
    closed: bool,
}

impl ProcessSession {
    /// Spawn the backend with piped stdin/stdout.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Spawn` if the executable is missing or not
    /// runnable, and `IpcError::MissingPipe` if a pipe could not be captured.
    pub fn spawn(command: &BackendCommand) -> Result<Self, IpcError> {
        info!("Spawning backend: {} {:?}", command.program, command.args);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(command.stderr.stdio())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| IpcError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(IpcError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(IpcError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(command.program.clone(), stderr);
        }

        debug!("Backend {} started (pid {:?})", command.program, child.id());

        Ok(Self {
            label: command.program.clone(),
            writer: Some(Box::new(stdin)),
            reader: Some(Box::new(stdout)),
            child: Some(child),
            read_buf: vec![0; READ_CHUNK_SIZE],
            closed: false,
        })
    }

    /// Build a session over arbitrary pipes with no process behind them.
    ///
    /// Used to drive a client from an in-process fake backend.
    pub fn from_pipes<W, R>(label: impl Into<String>, writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            writer: Some(Box::new(writer)),
            reader: Some(Box::new(reader)),
            child: None,
            read_buf: vec![0; READ_CHUNK_SIZE],
            closed: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, if a live process backs this session.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write a complete request to the backend's stdin and flush it.
    ///
    /// # Errors
    ///
    /// `IpcError::Write` on a broken pipe, `IpcError::Closed` after `close()`.
    pub async fn write_bytes(&mut self, buf: &[u8]) -> Result<(), IpcError> {
        let writer = self.writer.as_mut().ok_or(IpcError::Closed)?;
        writer.write_all(buf).await.map_err(IpcError::Write)?;
        writer.flush().await.map_err(IpcError::Write)
    }

    /// Wait for the next chunk of stdout.
    ///
    /// A zero-length read is reported as [`Chunk::Eof`], never as empty data.
    /// Cancel-safe: dropping the future loses no bytes.
    pub async fn read_chunk(&mut self) -> Result<Chunk, IpcError> {
        let reader = self.reader.as_mut().ok_or(IpcError::Closed)?;
        let n = reader
            .read(&mut self.read_buf)
            .await
            .map_err(IpcError::Read)?;
        if n == 0 {
            debug!("Backend {} closed stdout", self.label);
            return Ok(Chunk::Eof);
        }
        Ok(Chunk::Data(self.read_buf[..n].to_vec()))
    }

    /// Shut the backend down and release every handle.
    ///
    /// Sends `exit_marker` if given and closes stdin, giving up after 500ms
    /// if the backend stops reading. Then drops stdout (no read can be
    /// pending since reads borrow the session mutably) and waits up to
    /// another 500ms for the process to exit before killing it. Idempotent:
    /// later calls return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::Wait` if the process could not be reaped. Handles
    /// are released regardless.
    pub async fn close(&mut self, exit_marker: Option<&[u8]>) -> Result<Option<ExitStatus>, IpcError> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;

        if let Some(mut writer) = self.writer.take() {
            let label = &self.label;
            let release = async {
                if let Some(marker) = exit_marker {
                    // The backend may already be gone; the exit marker is best effort.
                    if let Err(e) = writer.write_all(marker).await {
                        debug!("Backend {}: exit marker not delivered: {}", label, e);
                    } else if let Err(e) = writer.flush().await {
                        debug!("Backend {}: exit marker flush failed: {}", label, e);
                    }
                }
                if let Err(e) = writer.shutdown().await {
                    debug!("Backend {}: closing stdin failed: {}", label, e);
                }
            };
            if timeout(CLOSE_GRACE, release).await.is_err() {
                warn!("Backend {} is not reading stdin, dropping the pipe", self.label);
            }
        }
        self.reader.take();

        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        match timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Backend {} exited with {}", self.label, status);
                Ok(Some(status))
            }
            Ok(Err(e)) => {
                warn!("Error waiting for backend {}: {}", self.label, e);
                let _ = child.start_kill();
                Err(IpcError::Wait(e))
            }
            Err(_) => {
                warn!("Backend {} didn't exit gracefully, killing", self.label);
                child.kill().await.map_err(IpcError::Wait)?;
                let status = child.wait().await.map_err(IpcError::Wait)?;
                debug!("Backend {} killed ({})", self.label, status);
                Ok(Some(status))
            }
        }
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("label", &self.label)
            .field("pid", &self.pid())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Ok(None) = child.try_wait() {
                warn!("Backend {} dropped without close, killing", self.label);
                let _ = child.start_kill();
            }
        }
    }
}

/// Drain a piped stderr into the debug log so the backend never blocks on it.
fn forward_stderr(label: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!("[{}] {}", label, line),
                Ok(None) => break,
                Err(e) => {
                    debug!("[{}] stderr read failed: {}", label, e);
                    break;
                }
            }
        }
    });
}
