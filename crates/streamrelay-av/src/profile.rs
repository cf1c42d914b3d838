//! Transcode profiles and ffmpeg argument construction.
//!
//! A [`TranscodeProfile`] is derived deterministically from the request's
//! content class (or the remux/subtitle variant) and renders to an ffmpeg
//! argument vector via [`TranscodeProfile::to_args`]. VOD profiles favour
//! seekability; LIVE profiles favour time-to-first-byte.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamrelay_common::{ContentClass, ContentTypeHint};

/// Path segments that mark catalogue (VOD) content on IPTV-style origins.
const VOD_PATH_MARKERS: &[&str] = &["/movie/", "/series/"];

/// File extensions that indicate a static, seekable file.
const VOD_EXTENSIONS: &[&str] = &["mkv", "mp4", "m4v", "mov", "avi", "webm", "wmv", "flv"];

/// Decide VOD vs LIVE for a transcode request.
///
/// An explicit hint wins. Otherwise the URL path is checked for catalogue
/// markers and static-file extensions; anything else is LIVE.
pub fn classify_content(hint: ContentTypeHint, url: &str) -> ContentClass {
    match hint {
        ContentTypeHint::Vod => return ContentClass::Vod,
        ContentTypeHint::Live => return ContentClass::Live,
        ContentTypeHint::Auto => {}
    }

    let path = url_path(url).to_ascii_lowercase();

    if VOD_PATH_MARKERS.iter().any(|m| path.contains(m)) {
        return ContentClass::Vod;
    }

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext);

    match extension {
        Some(ext) if VOD_EXTENSIONS.contains(&ext) => ContentClass::Vod,
        _ => ContentClass::Live,
    }
}

/// Strip scheme/authority, query, and fragment, leaving the path.
fn url_path(url: &str) -> &str {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    match without_query.find("://") {
        Some(idx) => {
            let rest = &without_query[idx + 3..];
            rest.find('/').map(|p| &rest[p..]).unwrap_or("/")
        }
        None => without_query,
    }
}

/// Operator-tunable transcode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeSettings {
    /// How long a subprocess survives a pre-output disconnect.
    pub grace_window_ms: u64,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_channels: u32,
    /// `copy` (default) or `encode`.
    pub video_mode: String,
    pub video_preset: String,
    pub video_crf: u32,
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            grace_window_ms: 3000,
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            audio_channels: 2,
            video_mode: "copy".into(),
            video_preset: "veryfast".into(),
            video_crf: 23,
        }
    }
}

impl TranscodeSettings {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    fn video(&self) -> VideoMode {
        if self.video_mode.eq_ignore_ascii_case("encode") {
            VideoMode::Encode {
                preset: self.video_preset.clone(),
                crf: self.video_crf,
            }
        } else {
            VideoMode::Copy
        }
    }

    fn audio(&self) -> AudioMode {
        AudioMode::Encode {
            codec: self.audio_codec.clone(),
            bitrate: self.audio_bitrate.clone(),
            channels: self.audio_channels,
        }
    }
}

/// Which variant of the supervisor a profile drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Transcode(ContentClass),
    Remux,
    Subtitle { index: u32 },
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcode(class) => write!(f, "transcode-{class}"),
            Self::Remux => write!(f, "remux"),
            Self::Subtitle { index } => write!(f, "subtitle-{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoMode {
    Copy,
    /// libx264 re-encode for sources whose video the client cannot decode.
    Encode { preset: String, crf: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMode {
    Copy,
    Encode {
        codec: String,
        bitrate: String,
        channels: u32,
    },
}

/// Input-side reconnect flags for flaky IPTV origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub streamed: bool,
    pub at_eof: bool,
    pub delay_max_secs: u32,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            streamed: false,
            at_eof: false,
            delay_max_secs: 0,
        }
    }

    fn finite() -> Self {
        Self {
            enabled: true,
            streamed: true,
            at_eof: false,
            delay_max_secs: 5,
        }
    }

    fn unbounded() -> Self {
        Self {
            at_eof: true,
            ..Self::finite()
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        if !self.enabled {
            return;
        }
        push(args, ["-reconnect", "1"]);
        if self.at_eof {
            push(args, ["-reconnect_at_eof", "1"]);
        }
        if self.streamed {
            push(args, ["-reconnect_streamed", "1"]);
        }
        args.push("-reconnect_delay_max".into());
        args.push(self.delay_max_secs.to_string());
    }
}

/// The complete flag set chosen for one subprocess run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub kind: ProfileKind,
    /// `-movflags` value for mp4 output.
    pub container_flags: Option<String>,
    pub video_mode: VideoMode,
    pub audio_mode: AudioMode,
    pub buffer_size: Option<String>,
    /// Fragment bound; also the forced keyframe spacing when encoding video.
    pub keyframe_interval: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl TranscodeProfile {
    /// Audio re-encode profile for the given content class.
    pub fn transcode(class: ContentClass, settings: &TranscodeSettings) -> Self {
        let (flags, buffer, interval, reconnect) = match class {
            ContentClass::Vod => (
                "faststart+empty_moov+omit_tfhd_offset+frag_discont",
                "32M",
                Duration::from_secs(10),
                ReconnectPolicy::finite(),
            ),
            ContentClass::Live => (
                "frag_keyframe+empty_moov+default_base_moof",
                "10M",
                Duration::from_secs(1),
                ReconnectPolicy::unbounded(),
            ),
        };

        Self {
            kind: ProfileKind::Transcode(class),
            container_flags: Some(flags.into()),
            video_mode: settings.video(),
            audio_mode: settings.audio(),
            buffer_size: Some(buffer.into()),
            keyframe_interval: Some(interval),
            reconnect,
        }
    }

    /// Container-only copy of the first video and audio track.
    pub fn remux() -> Self {
        Self {
            kind: ProfileKind::Remux,
            container_flags: Some("frag_keyframe+empty_moov+default_base_moof".into()),
            video_mode: VideoMode::Copy,
            audio_mode: AudioMode::Copy,
            buffer_size: None,
            keyframe_interval: None,
            reconnect: ReconnectPolicy::finite(),
        }
    }

    /// Single-track subtitle conversion to WebVTT.
    pub fn subtitle(index: u32) -> Self {
        Self {
            kind: ProfileKind::Subtitle { index },
            container_flags: None,
            video_mode: VideoMode::Copy,
            audio_mode: AudioMode::Copy,
            buffer_size: None,
            keyframe_interval: None,
            reconnect: ReconnectPolicy::disabled(),
        }
    }

    /// MIME type of the subprocess output.
    pub fn content_type(&self) -> &'static str {
        match self.kind {
            ProfileKind::Subtitle { .. } => "text/vtt; charset=utf-8",
            _ => "video/mp4",
        }
    }

    /// Whether the response should advertise byte-range support.
    pub fn advertises_ranges(&self) -> bool {
        self.kind == ProfileKind::Transcode(ContentClass::Vod)
    }

    /// Render the full ffmpeg argument vector, writing output to stdout.
    pub fn to_args(&self, url: &str, user_agent: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::with_capacity(48);
        push(&mut args, ["-hide_banner", "-loglevel", "warning"]);
        args.push("-user_agent".into());
        args.push(user_agent.into());

        match self.kind {
            ProfileKind::Remux => {
                push(&mut args, ["-probesize", "32768", "-analyzeduration", "500000"]);
                push(&mut args, ["-fflags", "+genpts+discardcorrupt+igndts+nobuffer"]);
                push(&mut args, ["-err_detect", "ignore_err", "-max_delay", "5000000"]);
            }
            ProfileKind::Subtitle { .. } => {
                push(&mut args, ["-probesize", "5000000", "-analyzeduration", "5000000"]);
            }
            ProfileKind::Transcode(_) => {}
        }

        self.reconnect.push_args(&mut args);
        args.push("-i".into());
        args.push(url.into());

        if let ProfileKind::Subtitle { index } = self.kind {
            args.push("-map".into());
            args.push(format!("0:{index}"));
            push(&mut args, ["-c:s", "webvtt", "-f", "webvtt", "-"]);
            return args;
        }

        // First video and first (optional) audio only; subtitle and data
        // tracks break mp4 muxing for many sources.
        push(&mut args, ["-map", "0:v:0", "-map", "0:a:0?", "-sn", "-dn"]);

        match &self.video_mode {
            VideoMode::Copy => push(&mut args, ["-c:v", "copy"]),
            VideoMode::Encode { preset, crf } => {
                push(&mut args, ["-c:v", "libx264", "-preset"]);
                args.push(preset.clone());
                args.push("-crf".into());
                args.push(crf.to_string());
                if let Some(interval) = self.keyframe_interval {
                    args.push("-force_key_frames".into());
                    args.push(format!("expr:gte(t,n_forced*{})", interval.as_secs()));
                }
            }
        }

        match &self.audio_mode {
            AudioMode::Copy => push(&mut args, ["-c:a", "copy"]),
            AudioMode::Encode {
                codec,
                bitrate,
                channels,
            } => {
                args.push("-c:a".into());
                args.push(codec.clone());
                args.push("-ac".into());
                args.push(channels.to_string());
                args.push("-b:a".into());
                args.push(bitrate.clone());
                push(&mut args, ["-af", "aresample=async=1:min_hard_comp=0.100:first_pts=0"]);
            }
        }

        if self.kind == ProfileKind::Remux {
            push(&mut args, ["-fps_mode", "passthrough", "-max_muxing_queue_size", "1024"]);
        }

        args.push("-f".into());
        args.push("mp4".into());
        if let Some(flags) = &self.container_flags {
            args.push("-movflags".into());
            args.push(flags.clone());
        }
        if let Some(interval) = self.keyframe_interval {
            args.push("-frag_duration".into());
            args.push(interval.as_micros().to_string());
        }
        if let Some(size) = &self.buffer_size {
            args.push("-bufsize".into());
            args.push(size.clone());
            push(&mut args, ["-max_muxing_queue_size", "4096"]);
        }

        args.push("-".into());
        args
    }
}

fn push<const N: usize>(args: &mut Vec<String>, items: [&str; N]) {
    args.extend(items.iter().map(|s| s.to_string()));
}
