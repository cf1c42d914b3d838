mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./streamrelay.toml",
        "./config.toml",
        "~/.config/streamrelay/config.toml",
        "/etc/streamrelay/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if let Some(public_url) = &config.server.public_url {
        url::Url::parse(public_url)
            .with_context(|| format!("Invalid server.public_url: {public_url}"))?;
    }

    if config.upstream.max_manifest_bytes == 0 {
        anyhow::bail!("upstream.max_manifest_bytes cannot be 0");
    }

    if config.upstream.max_attempts == 0 {
        tracing::warn!("upstream.max_attempts is 0; treating as 1");
    } else if config.upstream.max_attempts > MAX_ATTEMPTS {
        tracing::warn!(
            "upstream.max_attempts is {}; capped at {}",
            config.upstream.max_attempts,
            MAX_ATTEMPTS
        );
    }

    for (i, rule) in config.upstream.origin_overrides.iter().enumerate() {
        if rule.domains.is_empty() || rule.domains.iter().any(|d| d.is_empty()) {
            anyhow::bail!("Origin override #{} has an empty domain list or entry", i + 1);
        }
        if rule.origin.is_empty() {
            anyhow::bail!("Origin override #{} has no origin", i + 1);
        }
    }

    let mode = config.transcode.video_mode.to_ascii_lowercase();
    if mode != "copy" && mode != "encode" {
        anyhow::bail!(
            "transcode.video_mode must be \"copy\" or \"encode\", got {:?}",
            config.transcode.video_mode
        );
    }

    if let Some(path) = &config.tools.ffmpeg_path {
        if !path.exists() {
            tracing::warn!("Configured ffmpeg path does not exist: {:?}", path);
        }
    }

    Ok(())
}
