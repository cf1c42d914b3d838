//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] around a
//! [`FakeLauncher`] instead of ffmpeg, and serves the router on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streamrelay::config::Config;
use streamrelay::server::context::AppContext;
use streamrelay::server::router::build_router;
use streamrelay_av::{ExitState, ProcessHandle, ProcessLauncher, ProfileKind, TranscodeProfile};
use streamrelay_common::{Error, Result};
use tokio::io::AsyncWriteExt;

/// What every process started by a [`FakeLauncher`] does.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write the bytes, then exit 0.
    Emit(Vec<u8>),
    /// Write the chunk every few milliseconds until killed.
    Endless(Vec<u8>),
    /// Never write and never exit; only a kill ends it.
    Silent,
    /// Exit with the code without writing anything.
    ExitImmediately(i32),
    /// Refuse to start.
    SpawnFailure,
}

/// A [`ProcessLauncher`] that runs a [`Script`] instead of a binary.
#[derive(Clone)]
pub struct FakeLauncher {
    script: Script,
    started: Arc<Mutex<Vec<(ProfileKind, String)>>>,
    kills: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            started: Arc::default(),
            kills: Arc::default(),
        }
    }

    pub fn started(&self) -> Vec<(ProfileKind, String)> {
        self.started.lock().clone()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Poll until at least `n` processes were killed, or give up after `timeout`.
    pub async fn wait_for_kills(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.kills() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.kills() >= n
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn start(&self, profile: &TranscodeProfile, url: &str) -> Result<ProcessHandle> {
        if matches!(self.script, Script::SpawnFailure) {
            return Err(Error::tool("ffmpeg", "failed to spawn: No such file or directory"));
        }

        let pid = {
            let mut started = self.started.lock();
            started.push((profile.kind, url.to_string()));
            4000 + started.len() as u32
        };

        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (handle, mut control) = ProcessHandle::new(Some(pid), reader);
        let script = self.script.clone();
        let kills = self.kills.clone();

        tokio::spawn(async move {
            let run = async move {
                match script {
                    Script::Emit(data) => {
                        let _ = writer.write_all(&data).await;
                        drop(writer);
                        0
                    }
                    Script::Endless(chunk) => loop {
                        if writer.write_all(&chunk).await.is_err() {
                            std::future::pending::<()>().await;
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    },
                    Script::Silent => {
                        let _writer = writer;
                        std::future::pending::<i32>().await
                    }
                    Script::ExitImmediately(code) => {
                        drop(writer);
                        code
                    }
                    Script::SpawnFailure => unreachable!(),
                }
            };

            let state = tokio::select! {
                _ = control.killed() => ExitState::Killed,
                code = run => ExitState::Exited(Some(code)),
            };
            if state == ExitState::Killed {
                kills.fetch_add(1, Ordering::SeqCst);
            }
            control.report(state);
        });

        Ok(handle)
    }
}

/// Full application context around a [`FakeLauncher`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub launcher: FakeLauncher,
}

impl TestHarness {
    pub fn new(script: Script) -> Self {
        Self::with_config(test_config(), script)
    }

    pub fn with_config(config: Config, script: Script) -> Self {
        let launcher = FakeLauncher::new(script);
        let ctx = AppContext::new(config, Arc::new(launcher.clone()))
            .expect("failed to build app context");
        Self { ctx, launcher }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(script: Script) -> (Self, SocketAddr) {
        Self::with_server_config(test_config(), script).await
    }

    /// Start an Axum server with custom config on a random port.
    pub async fn with_server_config(config: Config, script: Script) -> (Self, SocketAddr) {
        let harness = Self::with_config(config, script);
        let app = build_router(harness.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }
}

/// Defaults with a short retry delay so retry tests stay quick.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.upstream.retry_delay_ms = 100;
    config.transcode.grace_window_ms = 200;
    config
}

/// Gateway URL for `path` with `url` percent-encoded as the query.
pub fn gateway(addr: SocketAddr, path: &str, url: &str) -> String {
    format!(
        "http://{addr}{path}?url={}",
        percent_encoding::utf8_percent_encode(url, percent_encoding::NON_ALPHANUMERIC)
    )
}
