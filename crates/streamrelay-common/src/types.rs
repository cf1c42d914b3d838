//! Request-level vocabulary shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-supplied hint about what kind of content the origin URL serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentTypeHint {
    /// Infer from the URL shape.
    #[default]
    Auto,
    /// Finite, seekable content (movies, series episodes, static files).
    Vod,
    /// Unbounded live channel.
    Live,
}

impl FromStr for ContentTypeHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "vod" | "movie" | "series" => Ok(Self::Vod),
            "live" => Ok(Self::Live),
            other => Err(format!("Unknown content type: {other}")),
        }
    }
}

impl fmt::Display for ContentTypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Vod => write!(f, "vod"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Resolved content class driving transcode profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    Vod,
    Live,
}

impl fmt::Display for ContentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vod => write!(f, "vod"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// One inbound playback request, created per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    /// Already-resolved absolute upstream URL.
    pub origin_url: String,
    /// Inbound `Range` header, forwarded verbatim when present.
    pub range_header: Option<String>,
    /// Content type hint from the `type` query parameter.
    pub content_type_hint: ContentTypeHint,
    /// Absolute stream index for subtitle extraction.
    pub subtitle_track_index: Option<u32>,
}

impl PlaybackRequest {
    /// Create a request for the given origin URL with no range or hints.
    pub fn new(origin_url: impl Into<String>) -> Self {
        Self {
            origin_url: origin_url.into(),
            range_header: None,
            content_type_hint: ContentTypeHint::Auto,
            subtitle_track_index: None,
        }
    }

    pub fn with_range(mut self, range: Option<String>) -> Self {
        self.range_header = range;
        self
    }

    pub fn with_hint(mut self, hint: ContentTypeHint) -> Self {
        self.content_type_hint = hint;
        self
    }

    pub fn with_subtitle_track(mut self, index: u32) -> Self {
        self.subtitle_track_index = Some(index);
        self
    }
}
