use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use streamrelay_av::{ToolsConfig, TranscodeSettings};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub transcode: TranscodeSettings,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible base URL used in rewritten manifests
    /// (e.g. `https://tv.example.com`). When unset, the inbound Host header is used.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Fixed delay between a 5xx attempt and its retry
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound on a manifest body that will be buffered for rewriting
    #[serde(default = "default_max_manifest_bytes")]
    pub max_manifest_bytes: usize,

    /// Binary bodies with a declared length at or below this are buffered
    #[serde(default = "default_small_body_limit")]
    pub small_body_limit: usize,

    #[serde(default = "default_origin_overrides")]
    pub origin_overrides: Vec<OriginOverride>,
}

/// Origin/Referer spoofing for CDNs that reject mismatched origins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OriginOverride {
    /// Substrings matched against the upstream URL
    pub domains: Vec<String>,

    /// Value sent as `Origin`
    pub origin: String,

    /// Value sent as `Referer`; defaults to the origin with a trailing slash
    #[serde(default)]
    pub referer: Option<String>,
}

impl OriginOverride {
    pub fn matches(&self, url: &str) -> bool {
        self.domains.iter().any(|d| url.contains(d.as_str()))
    }

    pub fn referer(&self) -> String {
        self.referer
            .clone()
            .unwrap_or_else(|| format!("{}/", self.origin.trim_end_matches('/')))
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_retry_delay() -> u64 {
    500
}
fn default_max_attempts() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_manifest_bytes() -> usize {
    8 * 1024 * 1024
}
fn default_small_body_limit() -> usize {
    64 * 1024
}
fn default_origin_overrides() -> Vec<OriginOverride> {
    vec![OriginOverride {
        domains: ["pluto.tv", "pluto.io", "plutotv.net", "siloh.pluto.tv", "service-stitcher"]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        origin: "https://pluto.tv".to_string(),
        referer: None,
    }]
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            retry_delay_ms: default_retry_delay(),
            max_attempts: default_max_attempts(),
            connect_timeout_secs: default_connect_timeout(),
            max_manifest_bytes: default_max_manifest_bytes(),
            small_body_limit: default_small_body_limit(),
            origin_overrides: default_origin_overrides(),
        }
    }
}

/// Upper bound on upstream attempts, whatever the config says.
pub const MAX_ATTEMPTS: u32 = 2;

impl UpstreamConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Total attempts per request: the first try plus at most one retry.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }
}
