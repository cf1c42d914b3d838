//! Transcode path: pick a profile, own a subprocess, stream its output.

mod reattach;
mod session;

#[cfg(test)]
pub(crate) mod test_launcher;

use std::sync::Arc;
use std::time::Duration;

use streamrelay_av::{classify_content, ProcessLauncher, TranscodeProfile, TranscodeSettings};
use streamrelay_common::{PlaybackRequest, Result};

pub use reattach::{ReattachPool, SessionKey};
pub use session::{SupervisorState, TranscodeSession};

/// Starts (or re-adopts) subprocesses and hands each to a [`TranscodeSession`].
#[derive(Clone)]
pub struct Supervisor {
    launcher: Arc<dyn ProcessLauncher>,
    pool: ReattachPool,
    settings: TranscodeSettings,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, settings: TranscodeSettings) -> Self {
        Self {
            launcher,
            pool: ReattachPool::new(),
            settings,
        }
    }

    pub fn grace_window(&self) -> Duration {
        self.settings.grace_window()
    }

    pub fn pool(&self) -> &ReattachPool {
        &self.pool
    }

    /// Audio re-encode profile, VOD or LIVE per hint and URL shape.
    pub fn transcode_profile(&self, request: &PlaybackRequest) -> TranscodeProfile {
        let class = classify_content(request.content_type_hint, &request.origin_url);
        TranscodeProfile::transcode(class, &self.settings)
    }

    /// `Idle -> Launching`: claim a parked process for the same key, or start one.
    pub async fn open(
        &self,
        request: &PlaybackRequest,
        profile: &TranscodeProfile,
    ) -> Result<TranscodeSession> {
        let key = SessionKey::new(profile.kind, request.origin_url.clone());

        let handle = match self.pool.claim(&key) {
            Some(handle) => handle,
            None => {
                let handle = self.launcher.start(profile, &request.origin_url).await?;
                tracing::info!(
                    pid = ?handle.pid(),
                    profile = %profile.kind,
                    url = %crate::relay::fetcher::truncate_url(&request.origin_url),
                    "Started subprocess"
                );
                handle
            }
        };

        Ok(TranscodeSession::new(
            key,
            handle,
            self.pool.clone(),
            self.grace_window(),
        ))
    }
}
