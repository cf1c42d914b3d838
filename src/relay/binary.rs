//! Verbatim body relay with range header propagation.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::BytesMut;
use futures::StreamExt;
use streamrelay_common::{Error, Result};

use super::fetcher::{BodyStream, UpstreamResponse};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Response headers derived from the upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHeaders {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub content_range: Option<String>,
    pub accept_ranges: Option<String>,
}

impl RelayHeaders {
    /// Copy length and range headers; a length without a range implies the
    /// origin can serve byte ranges.
    pub fn from_upstream(upstream: &UpstreamResponse) -> Self {
        let accept_ranges = match (&upstream.accept_ranges, upstream.content_length, &upstream.content_range) {
            (Some(value), _, _) => Some(value.clone()),
            (None, Some(_), None) => Some("bytes".to_string()),
            _ => None,
        };

        Self {
            content_type: upstream
                .content_type
                .clone()
                .filter(|ct| !ct.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_length: upstream.content_length,
            content_range: upstream.content_range.clone(),
            accept_ranges,
        }
    }
}

fn status_of(upstream: &UpstreamResponse) -> StatusCode {
    StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK)
}

fn builder(status: StatusCode, headers: &RelayHeaders) -> axum::http::response::Builder {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, &headers.content_type);

    if let Some(range) = headers
        .content_range
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        builder = builder.header(header::CONTENT_RANGE, range);
    }
    if let Some(accept) = headers
        .accept_ranges
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        builder = builder.header(header::ACCEPT_RANGES, accept);
    }

    builder
}

/// Relay a binary body. `body` must already include any peeked prefix.
///
/// Bodies whose declared length is within `small_body_limit` are buffered
/// and sent with their exact length; everything else streams through.
pub async fn relay_binary(
    upstream: &UpstreamResponse,
    mut body: BodyStream,
    small_body_limit: usize,
) -> Result<Response> {
    let headers = RelayHeaders::from_upstream(upstream);
    let status = status_of(upstream);

    let small = headers
        .content_length
        .is_some_and(|len| len <= small_body_limit as u64);

    if small {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        tracing::debug!(
            status = status.as_u16(),
            bytes = buf.len(),
            content_type = %headers.content_type,
            "Relaying buffered body"
        );
        return builder(status, &headers)
            .header(header::CONTENT_LENGTH, buf.len())
            .body(Body::from(buf.freeze()))
            .map_err(|e| Error::Internal(format!("Failed to build response: {e}")));
    }

    tracing::debug!(
        status = status.as_u16(),
        content_length = ?headers.content_length,
        content_type = %headers.content_type,
        "Relaying streamed body"
    );

    let mut response = builder(status, &headers);
    if let Some(len) = headers.content_length {
        response = response.header(header::CONTENT_LENGTH, len);
    }
    response
        .body(Body::from_stream(body))
        .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
}

/// Response for an upstream body with no bytes at all.
pub fn empty_response(upstream: &UpstreamResponse) -> Result<Response> {
    let headers = RelayHeaders::from_upstream(upstream);
    Response::builder()
        .status(status_of(upstream))
        .header(header::CONTENT_TYPE, headers.content_type)
        .body(Body::empty())
        .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
}
