//! Claude Code session process.
//!
//! A [`SessionProcess`] spawns one CLI child, decodes its stdout through the
//! stream parser, accepts validated user input on stdin, and reports
//! lifecycle changes through [`SessionEvent`]s.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::{
    encode_user_input, EventHandlers, HandlerId, SessionError, SessionEvent, SessionEventKind,
    StreamParser,
};

/// Default binary for the agent CLI.
pub const DEFAULT_BINARY: &str = "claude";

/// Maximum accepted size of one user input, in bytes.
pub const MAX_INPUT_BYTES: usize = 100_000;

/// How long the exit supervisor waits for output readers to drain.
pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_SIZE: usize = 8192;

/// Environment applied to every child: non-interactive mode, and no
/// nested-session guard so the CLI can be driven from inside another session.
const BASE_ENV: [(&str, &str); 2] = [("CI", "1"), ("CLAUDECODE", "")];

/// Lifecycle status of a session process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopped,
    Error,
}

/// Signal used to stop a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    #[default]
    Terminate,
    Interrupt,
    Hangup,
    Kill,
}

impl StopSignal {
    /// Conventional signal name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Interrupt => "SIGINT",
            Self::Hangup => "SIGHUP",
            Self::Kill => "SIGKILL",
        }
    }

    #[cfg(unix)]
    fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Terminate => Signal::SIGTERM,
            Self::Interrupt => Signal::SIGINT,
            Self::Hangup => Signal::SIGHUP,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProcessInfo {
    pub id: String,
    pub status: ProcessStatus,
    pub cwd: PathBuf,
    pub spawn_args: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Most recent runtime error, informational only.
    pub last_error: Option<String>,
}

/// State shared between the session handle and its background tasks.
#[derive(Debug)]
struct Shared {
    info: Mutex<SessionProcessInfo>,
    handlers: EventHandlers,
    /// Set as soon as the child has been waited on; its pid may be reused after this.
    reaped: AtomicBool,
}

impl Shared {
    fn info(&self) -> MutexGuard<'_, SessionProcessInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &SessionEvent) {
        self.handlers.emit(event);
    }

    fn record_runtime_error(&self, err: std::io::Error) {
        let session_id = {
            let mut info = self.info();
            info.last_error = Some(err.to_string());
            info.id.clone()
        };
        tracing::error!(session_id = %session_id, error = %err, "Claude CLI process error");
        self.emit(&SessionEvent::Error(Arc::new(err)));
    }

    fn record_exit(&self, status: ExitStatus) {
        let code = status.code();
        let signal = exit_signal_name(status);
        let session_id = {
            let mut info = self.info();
            info.exit_code = code;
            info.exit_signal.clone_from(&signal);
            info.ended_at = Some(Utc::now());
            if info.status == ProcessStatus::Running {
                info.status = ProcessStatus::Stopped;
            }
            info.id.clone()
        };
        tracing::info!(
            session_id = %session_id,
            code = ?code,
            signal = ?signal,
            "Claude CLI process exited"
        );
        self.emit(&SessionEvent::Exit { code, signal });
    }
}

#[cfg(unix)]
fn exit_signal_name(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|raw| {
        nix::sys::signal::Signal::try_from(raw)
            .map_or_else(|_| raw.to_string(), |signal| signal.as_str().to_string())
    })
}

#[cfg(not(unix))]
fn exit_signal_name(_status: ExitStatus) -> Option<String> {
    None
}

/// Stdin pipe state.
#[derive(Debug)]
enum Stdin {
    Unavailable,
    Open(ChildStdin),
    Closed,
}

/// One Claude Code CLI child process and its event wiring.
#[derive(Debug)]
pub struct SessionProcess {
    shared: Arc<Shared>,
    binary: String,
    env: Vec<(String, String)>,
    stdin: Stdin,
    shutdown: CancellationToken,
    started: bool,
}

impl SessionProcess {
    /// Create a session that will run the CLI in `cwd` with `args`.
    #[must_use]
    pub fn new(id: impl Into<String>, cwd: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let info = SessionProcessInfo {
            id: id.into(),
            status: ProcessStatus::Starting,
            cwd: cwd.into(),
            spawn_args: args,
            metadata: serde_json::Map::new(),
            pid: None,
            exit_code: None,
            exit_signal: None,
            started_at: None,
            ended_at: None,
            last_error: None,
        };
        Self {
            shared: Arc::new(Shared {
                info: Mutex::new(info),
                handlers: EventHandlers::new(),
                reaped: AtomicBool::new(false),
            }),
            binary: DEFAULT_BINARY.to_string(),
            env: Vec::new(),
            stdin: Stdin::Unavailable,
            shutdown: CancellationToken::new(),
            started: false,
        }
    }

    /// Attach caller metadata to the session info.
    #[must_use]
    pub fn with_metadata(self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.shared.info().metadata = metadata;
        self
    }

    /// Use a different binary (for testing or alternative installs).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Add an environment variable for the child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Add several environment variables for the child.
    #[must_use]
    pub fn with_envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> String {
        self.shared.info().id.clone()
    }

    /// Process ID, once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.info().pid
    }

    /// Copy of the current session info.
    #[must_use]
    pub fn info(&self) -> SessionProcessInfo {
        self.shared.info().clone()
    }

    /// Returns true while the process is running and has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.info().status == ProcessStatus::Running
    }

    /// Register an event handler.
    pub fn on<F>(&self, kind: SessionEventKind, handler: F) -> HandlerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.handlers.on(kind, handler)
    }

    /// Unregister an event handler.
    pub fn off(&self, kind: SessionEventKind, id: HandlerId) -> bool {
        self.shared.handlers.off(kind, id)
    }

    /// Spawn the CLI process.
    ///
    /// Resolves once the OS confirms the spawn. Output readers and the exit
    /// supervisor are running when this returns.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyStarted` on a second call, or
    /// `SessionError::Spawn` with the OS error if the process cannot start.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        self.started = true;

        let (session_id, cwd, args) = {
            let info = self.shared.info();
            (info.id.clone(), info.cwd.clone(), info.spawn_args.clone())
        };

        tracing::debug!(
            session_id = %session_id,
            command = %display_command(&self.binary, &args),
            cwd = %cwd.display(),
            "Spawning Claude CLI"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .current_dir(&cwd)
            .envs(BASE_ENV)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.shared.info().status = ProcessStatus::Error;
                tracing::error!(session_id = %session_id, error = %e, "Failed to spawn Claude CLI");
                let event_err = std::io::Error::new(e.kind(), e.to_string());
                self.shared.emit(&SessionEvent::Error(Arc::new(event_err)));
                return Err(SessionError::Spawn(e));
            }
        };

        let pid = child.id();
        {
            let mut info = self.shared.info();
            info.pid = pid;
            info.status = ProcessStatus::Running;
            info.started_at = Some(Utc::now());
        }
        tracing::info!(session_id = %session_id, pid = ?pid, "Spawned Claude CLI");

        self.stdin = child.stdin.take().map_or(Stdin::Unavailable, Stdin::Open);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stdout(stdout, Arc::clone(&self.shared))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stderr(stderr, Arc::clone(&self.shared))));
        }
        tokio::spawn(supervise_exit(
            child,
            Arc::clone(&self.shared),
            readers,
            self.shutdown.clone(),
        ));

        Ok(())
    }

    /// Send one user message to the CLI.
    ///
    /// The input is trimmed and written as a single stream-json line.
    ///
    /// # Errors
    ///
    /// Checks run in order: `NotRunning`, `StdinUnavailable`,
    /// `StdinNotWritable`, `InputTooLarge`, `NullByte`. Write failures are
    /// returned unmodified as `SessionError::Write`.
    pub async fn send_input(&mut self, input: &str) -> Result<(), SessionError> {
        if !self.is_running() {
            return Err(SessionError::NotRunning);
        }

        let stdin = match &mut self.stdin {
            Stdin::Unavailable => return Err(SessionError::StdinUnavailable),
            Stdin::Closed => return Err(SessionError::StdinNotWritable),
            Stdin::Open(stdin) => stdin,
        };

        if input.len() > MAX_INPUT_BYTES {
            return Err(SessionError::InputTooLarge {
                len: input.len(),
                max: MAX_INPUT_BYTES,
            });
        }

        if input.contains('\0') {
            return Err(SessionError::NullByte);
        }

        let line = encode_user_input(input.trim())?;
        let written = write_line(stdin, &line).await;
        if let Err(e) = written {
            tracing::error!(error = %e, "Error writing to Claude CLI stdin");
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                self.stdin = Stdin::Closed;
            }
            return Err(SessionError::Write(e));
        }

        tracing::debug!(bytes = line.len(), "Wrote user input to Claude CLI");
        Ok(())
    }

    /// Close stdin so the CLI sees end of input.
    pub fn close_stdin(&mut self) {
        if matches!(self.stdin, Stdin::Open(_)) {
            tracing::debug!("Closing Claude CLI stdin");
            self.stdin = Stdin::Closed;
        }
    }

    /// Send `signal` to the process and mark the session stopped.
    ///
    /// Does not wait for the process to exit; the later exit event records
    /// the observed exit code and signal. A stopped session whose child has
    /// not exited yet can be signalled again, so a child that ignores
    /// `SIGTERM` can be escalated to `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotRunning` if the session was never started
    /// or its child has exited, or `SessionError::Signal` if the signal
    /// cannot be delivered.
    pub fn stop(&self, signal: StopSignal) -> Result<(), SessionError> {
        let pid = {
            let info = self.shared.info();
            let signallable = matches!(info.status, ProcessStatus::Running | ProcessStatus::Stopped)
                && !self.shared.reaped.load(Ordering::SeqCst);
            if !signallable {
                return Err(SessionError::NotRunning);
            }
            info.pid
        };

        self.deliver(pid, signal)
            .map_err(|source| SessionError::Signal { signal, source })?;

        self.shared.info().status = ProcessStatus::Stopped;
        tracing::info!(pid = ?pid, signal = %signal, "Sent stop signal to Claude CLI");
        Ok(())
    }

    #[cfg(unix)]
    fn deliver(&self, pid: Option<u32>, signal: StopSignal) -> std::io::Result<()> {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Some(pid) = pid else {
            // No pid means the child is already reaped; let the supervisor kill path handle it.
            self.shutdown.cancel();
            return Ok(());
        };
        let raw = i32::try_from(pid)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(raw), signal.to_nix()).map_err(std::io::Error::from)
    }

    #[cfg(not(unix))]
    fn deliver(&self, _pid: Option<u32>, _signal: StopSignal) -> std::io::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

impl Drop for SessionProcess {
    fn drop(&mut self) {
        // Kills the child if it is still alive.
        self.shutdown.cancel();
    }
}

fn display_command(binary: &str, args: &[String]) -> String {
    std::iter::once(binary)
        .chain(args.iter().map(String::as_str))
        .map(|part| shell_escape::escape(part.into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn read_stdout<R>(mut stdout: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut parser = StreamParser::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                shared.record_runtime_error(e);
                break;
            }
        };
        tracing::trace!(bytes = n, "Received stdout chunk");

        let outcome = parser.feed(&chunk[..n]);
        for line in outcome.lines {
            if let Some(message) = line.message {
                shared.emit(&SessionEvent::Message(message));
            }
            if let Some(fragment) = line.fragment {
                shared.emit(&SessionEvent::Stdout(fragment));
            }
        }
        if let Some(discarded_bytes) = outcome.discarded {
            shared.emit(&SessionEvent::BufferOverflow { discarded_bytes });
        }
    }

    if parser.buffered_len() > 0 {
        tracing::debug!(
            bytes = parser.buffered_len(),
            "Discarding unterminated stdout line at end of stream"
        );
        parser.reset();
    }
}

async fn read_stderr<R>(mut stderr: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                shared.emit(&SessionEvent::Stderr(text));
            }
            Err(e) => {
                shared.record_runtime_error(e);
                break;
            }
        }
    }
}

async fn supervise_exit(
    mut child: Child,
    shared: Arc<Shared>,
    readers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = shutdown.cancelled() => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Kill on shutdown failed, process likely exited");
            }
            child.wait().await
        }
    };
    shared.reaped.store(true, Ordering::SeqCst);

    for reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, reader).await.is_err() {
            tracing::warn!("Output reader did not drain after exit");
        }
    }

    match status {
        Ok(status) => shared.record_exit(status),
        Err(e) => shared.record_runtime_error(e),
    }
}

/// Working directory used when none is configured.
#[must_use]
pub fn default_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}
