//! Per-request subprocess ownership and the supervisor state machine.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use streamrelay_av::{wait_for_exit, ExitState, ProcessHandle};
use streamrelay_common::{Error, Result};
use tokio::io::AsyncReadExt;

use super::reattach::{ReattachPool, SessionKey};
use crate::relay::BodyStream;

/// Read size for subprocess output.
const CHUNK_SIZE: usize = 64 * 1024;

/// How long to wait for a process to exit after its output closed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Launching,
    Streaming,
    Terminating,
    Terminated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::Streaming => "streaming",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// The lifecycle guard for one request's subprocess.
///
/// Dropping the session is the disconnect signal. A session dropped while
/// still `Launching` parks its process in the [`ReattachPool`] for the grace
/// window; one dropped while `Streaming` kills its process at once.
pub struct TranscodeSession {
    key: SessionKey,
    handle: Option<ProcessHandle>,
    state: SupervisorState,
    pending: Option<Bytes>,
    pool: ReattachPool,
    grace: Duration,
}

impl TranscodeSession {
    pub(crate) fn new(
        key: SessionKey,
        handle: ProcessHandle,
        pool: ReattachPool,
        grace: Duration,
    ) -> Self {
        let mut session = Self {
            key,
            handle: Some(handle),
            state: SupervisorState::Idle,
            pending: None,
            pool,
            grace,
        };
        session.transition(SupervisorState::Launching);
        session
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(ProcessHandle::pid)
    }

    fn transition(&mut self, to: SupervisorState) {
        tracing::debug!(
            pid = ?self.pid(),
            profile = %self.key.kind,
            from = %self.state,
            state = %to,
            "Supervisor transition"
        );
        self.state = to;
    }

    /// Wait for the first output byte.
    ///
    /// Moves `Launching -> Streaming`. If the process closes its output
    /// first, the session ends `Terminated` and the exit is returned as
    /// [`Error::ProcessExited`].
    pub async fn first_chunk(&mut self) -> Result<Bytes> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::Internal("transcode session has no process".into()))?;

        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = handle.output().read_buf(&mut buf).await;

        match read {
            Ok(0) => {
                let exit = self.finish().await;
                tracing::warn!(
                    profile = %self.key.kind,
                    code = ?exit.code(),
                    "Subprocess exited before producing output"
                );
                Err(Error::ProcessExited { code: exit.code() })
            }
            Ok(_) => {
                self.transition(SupervisorState::Streaming);
                Ok(buf.freeze())
            }
            Err(e) => {
                self.abort();
                Err(Error::from(e))
            }
        }
    }

    /// Turn the session into a response body that starts with `first`.
    pub fn into_stream(mut self, first: Bytes) -> BodyStream {
        self.pending = Some(first);
        futures::stream::unfold(self, |mut session| async move {
            let item = session.next_chunk().await?;
            Some((item, session))
        })
        .boxed()
    }

    async fn next_chunk(&mut self) -> Option<std::io::Result<Bytes>> {
        if let Some(first) = self.pending.take() {
            return Some(Ok(first));
        }

        let handle = self.handle.as_mut()?;
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);

        match handle.output().read_buf(&mut buf).await {
            Ok(0) => {
                self.finish().await;
                None
            }
            Ok(_) => Some(Ok(buf.freeze())),
            Err(e) => {
                tracing::warn!(pid = ?self.pid(), error = %e, "Subprocess output read failed");
                self.abort();
                Some(Err(e))
            }
        }
    }

    /// Output closed: wait for the exit, then end `Terminated`.
    async fn finish(&mut self) -> ExitState {
        self.transition(SupervisorState::Terminating);

        let exit = match self.handle.as_mut() {
            Some(handle) => match tokio::time::timeout(EXIT_TIMEOUT, handle.wait()).await {
                Ok(exit) => exit,
                Err(_) => {
                    tracing::warn!(pid = ?handle.pid(), "Subprocess closed output but did not exit, killing");
                    handle.kill();
                    handle.wait().await
                }
            },
            None => ExitState::Killed,
        };

        if exit.is_failure() {
            tracing::warn!(
                pid = ?self.pid(),
                profile = %self.key.kind,
                code = ?exit.code(),
                "Subprocess exited with failure"
            );
        } else {
            tracing::debug!(pid = ?self.pid(), exit = ?exit, "Subprocess finished");
        }

        self.transition(SupervisorState::Terminated);
        self.handle = None;
        exit
    }

    /// Kill without waiting; used on read errors.
    fn abort(&mut self) {
        self.transition(SupervisorState::Terminating);
        if let Some(mut handle) = self.handle.take() {
            handle.kill();
        }
        self.transition(SupervisorState::Terminated);
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };

        match self.state {
            SupervisorState::Launching if handle.exit_state().is_running() => {
                tracing::info!(
                    pid = ?handle.pid(),
                    profile = %self.key.kind,
                    state = %self.state,
                    "Client disconnected before first byte"
                );
                self.pool.park(self.key.clone(), handle, self.grace);
            }
            _ => {
                tracing::info!(
                    pid = ?handle.pid(),
                    profile = %self.key.kind,
                    state = %self.state,
                    "Client disconnected, killing subprocess"
                );
                self.state = SupervisorState::Terminating;
                let mut exit = handle.exit_watch();
                handle.kill();
                drop(handle);

                if let Ok(rt) = tokio::runtime::Handle::try_current() {
                    let profile = self.key.kind;
                    rt.spawn(async move {
                        let state = wait_for_exit(&mut exit).await;
                        tracing::debug!(
                            profile = %profile,
                            state = "terminated",
                            exit = ?state,
                            "Subprocess reaped after disconnect"
                        );
                    });
                }
            }
        }
    }
}

impl fmt::Debug for TranscodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodeSession")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .finish()
    }
}
