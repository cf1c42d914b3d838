//! Passthrough path: fetch, sniff, then rewrite or relay.

pub mod binary;
pub mod classifier;
pub mod fetcher;
pub mod manifest;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use streamrelay_common::{Error, PlaybackRequest, Result};

pub use classifier::{classify, BodyKind};
pub use fetcher::{BodyStream, Fetcher, UpstreamResponse};

/// Serve one `/stream` request.
///
/// `gateway` is the absolute URL of this server's `/stream` endpoint, used
/// when rewriting manifests.
pub async fn relay_stream(
    fetcher: &Fetcher,
    request: &PlaybackRequest,
    gateway: &str,
) -> Result<Response> {
    let (upstream, mut body) = fetcher
        .fetch(&request.origin_url, request.range_header.as_deref())
        .await?;

    let peeked = classifier::peek(&mut body).await.map_err(|e| {
        Error::unreachable(fetcher::truncate_url(&request.origin_url), e.to_string())
    })?;

    let Some(peeked) = peeked else {
        tracing::debug!(url = %fetcher::truncate_url(&request.origin_url), "Upstream body is empty");
        return binary::empty_response(&upstream);
    };

    match peeked.kind {
        BodyKind::Manifest => {
            let limit = fetcher.config().max_manifest_bytes;
            let text = manifest::read_manifest(&peeked.prefix, &mut body, limit).await?;
            tracing::info!(
                url = %fetcher::truncate_url(upstream.final_url.as_str()),
                "Rewriting HLS manifest"
            );
            let rewritten = manifest::rewrite(&text, &upstream.final_url, gateway);

            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, manifest::PLAYLIST_CONTENT_TYPE)
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(rewritten))
                .map_err(|e| Error::Internal(format!("Failed to build manifest response: {e}")))
        }
        BodyKind::Binary => {
            let body = classifier::replay(peeked.prefix, body);
            binary::relay_binary(&upstream, body, fetcher.config().small_body_limit).await
        }
    }
}

/// Serve one `/image` request: a cached, CORS-open copy of a remote image.
pub async fn relay_image(fetcher: &Fetcher, url: &str) -> Result<Response> {
    let (upstream, body) = fetcher.fetch_image(url).await?;
    let content_type = upstream
        .content_type
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| "image/png".to_string());

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK))
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=86400");
    if let Some(len) = upstream.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    builder
        .body(Body::from_stream(body))
        .map_err(|e| Error::Internal(format!("Failed to build image response: {e}")))
}
