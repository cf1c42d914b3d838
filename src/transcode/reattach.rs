//! Holding area for subprocesses whose client left before the first byte.
//!
//! Only orphaned handles ever live here. A live request owns its handle
//! directly; the pool is consulted solely when a new request could adopt a
//! process that an identical request abandoned moments ago.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use streamrelay_av::{ProcessHandle, ProfileKind};

/// Identity of a subprocess run: same profile against the same input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub kind: ProfileKind,
    pub url: String,
}

impl SessionKey {
    pub fn new(kind: ProfileKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

struct Parked {
    id: u64,
    handle: ProcessHandle,
}

/// Orphaned handles waiting out their grace window.
#[derive(Clone, Default)]
pub struct ReattachPool {
    parked: Arc<DashMap<SessionKey, Vec<Parked>>>,
    next_id: Arc<AtomicU64>,
}

impl ReattachPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `handle` for `grace`, then hard-kill it unless claimed.
    ///
    /// Outside a tokio runtime there is nothing to run the timer, so the
    /// handle is killed immediately.
    pub fn park(&self, key: SessionKey, mut handle: ProcessHandle, grace: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                handle.kill();
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pid = handle.pid();
        self.parked
            .entry(key.clone())
            .or_default()
            .push(Parked { id, handle });

        tracing::info!(
            pid = ?pid,
            profile = %key.kind,
            grace_ms = grace.as_millis() as u64,
            "Parked subprocess awaiting reconnect"
        );

        let pool = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(mut handle) = pool.take(&key, id) {
                handle.kill();
                tracing::info!(
                    pid = ?handle.pid(),
                    profile = %key.kind,
                    "No reconnect within grace window, killed subprocess"
                );
            }
        });
    }

    /// Adopt a parked, still-running handle for `key`.
    pub fn claim(&self, key: &SessionKey) -> Option<ProcessHandle> {
        let claimed = {
            let mut entry = self.parked.get_mut(key)?;
            let mut found = None;
            while let Some(parked) = entry.pop() {
                if parked.handle.exit_state().is_running() {
                    found = Some(parked.handle);
                    break;
                }
            }
            found
        };
        self.parked.remove_if(key, |_, v| v.is_empty());

        if let Some(handle) = &claimed {
            tracing::info!(pid = ?handle.pid(), profile = %key.kind, "Reattached to parked subprocess");
        }
        claimed
    }

    fn take(&self, key: &SessionKey, id: u64) -> Option<ProcessHandle> {
        let handle = {
            let mut entry = self.parked.get_mut(key)?;
            let pos = entry.iter().position(|p| p.id == id)?;
            entry.remove(pos).handle
        };
        self.parked.remove_if(key, |_, v| v.is_empty());
        Some(handle)
    }

    /// Number of parked handles.
    pub fn len(&self) -> usize {
        self.parked.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
