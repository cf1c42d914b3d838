//! Subprocess lifecycle for transcode runs.
//!
//! A [`ProcessLauncher`] turns a [`TranscodeProfile`] and input URL into a
//! running [`ProcessHandle`]. The handle exposes the process's stdout, a
//! hard-kill switch, and a watch on its exit state. Dropping the handle kills
//! the process, so whoever owns the handle owns the subprocess.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use streamrelay_common::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::{oneshot, watch};

use crate::profile::TranscodeProfile;
use crate::tools::ToolRegistry;

/// Boxed stdout of a running process.
pub type ProcessOutput = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Observed lifecycle state of a subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exited on its own; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Killed at our request.
    Killed,
}

impl ExitState {
    pub fn is_running(&self) -> bool {
        matches!(self, ExitState::Running)
    }

    /// Whether the exit should be reported as an error.
    ///
    /// Code 255 is what ffmpeg returns when it stops on a broken output pipe,
    /// which is the normal end of a client-abandoned stream.
    pub fn is_failure(&self) -> bool {
        match self {
            ExitState::Exited(Some(code)) => *code != 0 && *code != 255,
            ExitState::Exited(None) => true,
            ExitState::Running | ExitState::Killed => false,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitState::Exited(code) => *code,
            _ => None,
        }
    }
}

/// Owning handle to one running subprocess.
pub struct ProcessHandle {
    pid: Option<u32>,
    output: ProcessOutput,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<ExitState>,
}

/// Supervisor side of a [`ProcessHandle`].
///
/// Launchers keep this half next to the real process: they wait on
/// [`ProcessControl::killed`] and publish the outcome through
/// [`ProcessControl::report`].
pub struct ProcessControl {
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
}

impl ProcessHandle {
    /// Pair a new handle with its control half.
    pub fn new(
        pid: Option<u32>,
        output: impl AsyncRead + Send + Sync + 'static,
    ) -> (ProcessHandle, ProcessControl) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
        let handle = ProcessHandle {
            pid,
            output: Box::pin(output),
            kill_tx: Some(kill_tx),
            exit_rx,
        };
        (handle, ProcessControl { kill_rx, exit_tx })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The process's stdout. Travels with the handle so a reattached
    /// request resumes reading where the previous owner stopped.
    pub fn output(&mut self) -> &mut ProcessOutput {
        &mut self.output
    }

    /// Request a hard kill. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn exit_state(&self) -> ExitState {
        *self.exit_rx.borrow()
    }

    /// A receiver that observes exit transitions independently of the handle.
    pub fn exit_watch(&self) -> watch::Receiver<ExitState> {
        self.exit_rx.clone()
    }

    /// Wait until the process is no longer running.
    pub async fn wait(&mut self) -> ExitState {
        wait_for_exit(&mut self.exit_rx).await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("state", &self.exit_state())
            .finish()
    }
}

/// Wait on an exit watch until it leaves [`ExitState::Running`].
///
/// If the supervisor vanished without reporting, the last observed state is
/// returned.
pub async fn wait_for_exit(rx: &mut watch::Receiver<ExitState>) -> ExitState {
    let reported = match rx.wait_for(|state| !state.is_running()).await {
        Ok(state) => Some(*state),
        Err(_) => None,
    };
    reported.unwrap_or_else(|| *rx.borrow())
}

impl ProcessControl {
    /// Resolves once a kill was requested or the handle was dropped.
    pub async fn killed(&mut self) {
        let _ = (&mut self.kill_rx).await;
    }

    /// Publish the final state to every observer.
    pub fn report(&self, state: ExitState) {
        self.exit_tx.send_replace(state);
    }
}

/// Starts subprocesses for transcode profiles.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn start(&self, profile: &TranscodeProfile, url: &str) -> Result<ProcessHandle>;
}

/// Launches the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
    user_agent: String,
}

impl FfmpegLauncher {
    pub fn new(ffmpeg: impl Into<PathBuf>, user_agent: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Build a launcher from a discovered registry.
    ///
    /// When discovery found nothing the bare name `ffmpeg` is used, so a
    /// missing binary fails each spawn with [`Error::Tool`] instead of
    /// preventing startup.
    pub fn from_registry(registry: &ToolRegistry, user_agent: impl Into<String>) -> Self {
        match registry.require("ffmpeg") {
            Ok(path) => Self::new(path, user_agent),
            Err(e) => {
                tracing::warn!(error = %e, "ffmpeg not found; /transcode, /remux and /subtitle will fail");
                Self::new("ffmpeg", user_agent)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.ffmpeg
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn start(&self, profile: &TranscodeProfile, url: &str) -> Result<ProcessHandle> {
        let args = profile.to_args(url, &self.user_agent);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::tool("ffmpeg", format!("failed to spawn: {e}")))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool("ffmpeg", "stdout was not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, pid, profile.kind.to_string()));
        }

        tracing::debug!(pid = ?pid, profile = %profile.kind, "ffmpeg started");

        let (handle, mut control) = ProcessHandle::new(pid, stdout);

        tokio::spawn(async move {
            let state = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => ExitState::Exited(status.code()),
                    Err(e) => {
                        tracing::warn!(pid = ?pid, error = %e, "Failed to wait on ffmpeg");
                        ExitState::Exited(None)
                    }
                },
                _ = control.killed() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(pid = ?pid, error = %e, "Failed to kill ffmpeg");
                    }
                    ExitState::Killed
                }
            };
            tracing::debug!(pid = ?pid, state = ?state, "ffmpeg finished");
            control.report(state);
        });

        Ok(handle)
    }
}

/// Forward ffmpeg's stderr into the log. Errors and warnings go to `warn`,
/// progress chatter to `trace`.
async fn drain_stderr(stderr: ChildStderr, pid: Option<u32>, profile: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let lower = line.to_ascii_lowercase();
                if lower.contains("error") || lower.contains("warning") {
                    tracing::warn!(pid = ?pid, profile = %profile, "ffmpeg: {line}");
                } else {
                    tracing::trace!(pid = ?pid, profile = %profile, "ffmpeg: {line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::trace!(pid = ?pid, error = %e, "stderr read failed");
                break;
            }
        }
    }
}
