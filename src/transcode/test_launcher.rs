use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streamrelay_av::{ExitState, ProcessHandle, ProcessLauncher, ProfileKind, TranscodeProfile};
use streamrelay_common::{Error, Result};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{oneshot, Notify};

/// A launcher whose processes are driven by the test.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    processes: Mutex<Vec<FakeProcess>>,
    profiles: Mutex<Vec<ProfileKind>>,
    kills: AtomicUsize,
    changed: Notify,
    fail: bool,
}

/// Test-side controls for one fake process.
#[derive(Clone)]
pub struct FakeProcess {
    writer: Arc<tokio::sync::Mutex<Option<DuplexStream>>>,
    exit_tx: Arc<Mutex<Option<oneshot::Sender<i32>>>>,
}

impl FakeProcess {
    pub async fn write(&self, data: &[u8]) {
        if let Some(w) = self.writer.lock().await.as_mut() {
            let _ = w.write_all(data).await;
        }
    }

    /// Close output, then exit with `code`.
    pub async fn exit(&self, code: i32) {
        self.writer.lock().await.take();
        if let Some(tx) = self.exit_tx.lock().take() {
            let _ = tx.send(code);
        }
    }
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            inner: Arc::new(Inner {
                fail: true,
                ..Inner::default()
            }),
        }
    }

    pub fn started(&self) -> usize {
        self.inner.processes.lock().len()
    }

    pub fn kills(&self) -> usize {
        self.inner.kills.load(Ordering::SeqCst)
    }

    pub fn profiles(&self) -> Vec<ProfileKind> {
        self.inner.profiles.lock().clone()
    }

    /// Wait for the `index`th started process.
    pub async fn process(&self, index: usize) -> FakeProcess {
        self.wait_until(|l| l.started() > index).await;
        self.inner.processes.lock()[index].clone()
    }

    pub async fn wait_for_kills(&self, n: usize) {
        self.wait_until(|l| l.kills() >= n).await;
    }

    async fn wait_until(&self, cond: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let notified = self.inner.changed.notified();
            if cond(self) {
                return;
            }
            tokio::time::timeout_at(deadline, notified)
                .await
                .expect("timed out waiting on scripted launcher");
        }
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn start(&self, profile: &TranscodeProfile, _url: &str) -> Result<ProcessHandle> {
        if self.inner.fail {
            return Err(Error::tool("ffmpeg", "failed to spawn: not found"));
        }

        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let index = {
            let mut processes = self.inner.processes.lock();
            processes.push(FakeProcess {
                writer: Arc::new(tokio::sync::Mutex::new(Some(writer))),
                exit_tx: Arc::new(Mutex::new(Some(exit_tx))),
            });
            processes.len() - 1
        };
        self.inner.profiles.lock().push(profile.kind);

        let (handle, mut control) = ProcessHandle::new(Some(1000 + index as u32), reader);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let state = tokio::select! {
                _ = control.killed() => ExitState::Killed,
                code = exit_rx => ExitState::Exited(code.ok()),
            };
            control.report(state);
            if state == ExitState::Killed {
                inner.kills.fetch_add(1, Ordering::SeqCst);
            }
            inner.changed.notify_waiters();
        });

        self.inner.changed.notify_waiters();
        Ok(handle)
    }
}
