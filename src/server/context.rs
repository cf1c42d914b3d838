//! Shared application context.
//!
//! [`AppContext`] is handed to every route handler via Axum state. It holds
//! only shared infrastructure; nothing in it tracks individual requests.

use std::sync::Arc;

use anyhow::{Context, Result};
use streamrelay_av::{FfmpegLauncher, ProcessLauncher, ToolRegistry};

use crate::config::Config;
use crate::relay::Fetcher;
use crate::transcode::Supervisor;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub fetcher: Fetcher,
    pub supervisor: Supervisor,
}

impl AppContext {
    /// Build a context around the given process launcher.
    pub fn new(config: Config, launcher: Arc<dyn ProcessLauncher>) -> Result<Self> {
        let fetcher = Fetcher::new(config.upstream.clone()).context("Failed to build upstream client")?;
        let supervisor = Supervisor::new(launcher, config.transcode.clone());

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            supervisor,
        })
    }

    /// Build a context that launches the discovered ffmpeg binary.
    ///
    /// A missing ffmpeg only affects the subprocess endpoints; the
    /// passthrough endpoints keep working.
    pub fn with_ffmpeg(config: Config) -> Result<Self> {
        let tools = ToolRegistry::discover(&config.tools);
        let launcher = FfmpegLauncher::from_registry(&tools, config.upstream.user_agent.clone());
        tracing::info!(ffmpeg = %launcher.path().display(), "Using ffmpeg");
        Self::new(config, Arc::new(launcher))
    }
}
