//! # streamrelay-av
//!
//! Media-side building blocks for the streamrelay gateway.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate ffmpeg/ffprobe, honouring
//!   configured overrides before falling back to `PATH`.
//! - **Transcode profiles** ([`TranscodeProfile`]) -- the deterministic flag
//!   set for transcode, remux, and subtitle runs, plus VOD/LIVE
//!   classification ([`classify_content`]).
//! - **Process lifecycle** ([`ProcessLauncher`], [`ProcessHandle`]) -- start a
//!   subprocess, read its output, hard-kill it, and observe its exit.

pub mod process;
pub mod profile;
pub mod tools;

pub use process::{
    wait_for_exit, ExitState, FfmpegLauncher, ProcessControl, ProcessHandle, ProcessLauncher,
    ProcessOutput,
};
pub use profile::{
    classify_content, AudioMode, ProfileKind, ReconnectPolicy, TranscodeProfile,
    TranscodeSettings, VideoMode,
};
pub use tools::{ToolInfo, ToolRegistry, ToolsConfig};
