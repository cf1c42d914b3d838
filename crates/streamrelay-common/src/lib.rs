//! Shared types and utilities for streamrelay.
//!
//! This crate provides the unified error type and the small vocabulary of
//! request-level types shared by the relay path, the transcode supervisor,
//! and the process layer in `streamrelay-av`.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ContentClass, ContentTypeHint, PlaybackRequest};
