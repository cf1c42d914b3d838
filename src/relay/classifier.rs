//! Manifest-vs-binary sniffing.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use super::fetcher::BodyStream;

/// First bytes of every HLS playlist.
pub const PLAYLIST_MARKER: &[u8] = b"#EXTM3U";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Manifest,
    Binary,
}

/// Classify a body by its prefix. Pure; never consumes anything.
pub fn classify(prefix: &[u8]) -> BodyKind {
    if prefix.starts_with(PLAYLIST_MARKER) {
        BodyKind::Manifest
    } else {
        BodyKind::Binary
    }
}

/// Bytes read ahead of classification, to be replayed to the chosen consumer.
#[derive(Debug)]
pub struct Peeked {
    pub prefix: Bytes,
    pub kind: BodyKind,
}

/// Read until at least the marker length is buffered or the body ends.
///
/// Returns `None` for an empty body.
pub async fn peek(body: &mut BodyStream) -> std::io::Result<Option<Peeked>> {
    let mut buf = BytesMut::new();

    while buf.len() < PLAYLIST_MARKER.len() {
        match body.next().await {
            Some(chunk) => buf.extend_from_slice(&chunk?),
            None => break,
        }
    }

    if buf.is_empty() {
        return Ok(None);
    }

    let prefix = buf.freeze();
    Ok(Some(Peeked {
        kind: classify(&prefix),
        prefix,
    }))
}

/// Put the peeked prefix back in front of the remaining body.
pub fn replay(prefix: Bytes, rest: BodyStream) -> BodyStream {
    futures::stream::once(async move { Ok(prefix) })
        .chain(rest)
        .boxed()
}
