//! `/stream` and `/image`: upstream passthrough.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use streamrelay_common::PlaybackRequest;

use super::{request_id, require_url};
use crate::relay;
use crate::server::context::AppContext;
use crate::server::error::AppError;
use crate::server::middleware::request_id::RequestId;

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

/// Absolute URL of this server's `/stream` endpoint as the client sees it.
///
/// `server.public_url` wins; otherwise the inbound `Host` header and
/// `X-Forwarded-Proto` (default `http`) are used.
pub fn gateway_stream_url(ctx: &AppContext, headers: &HeaderMap) -> String {
    if let Some(public) = ctx.config.server.public_url.as_deref() {
        return format!("{}/stream", public.trim_end_matches('/'));
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", ctx.config.server.host, ctx.config.server.port));

    format!("{proto}://{host}/stream")
}

/// GET /stream?url=
pub async fn stream(
    State(ctx): State<AppContext>,
    Query(query): Query<UrlQuery>,
    headers: HeaderMap,
    rid: Option<Extension<RequestId>>,
) -> Result<Response, AppError> {
    let rid = request_id(rid);
    let fail = |e| AppError::new(e).with_request_id(rid.clone());

    let url = require_url(query.url).map_err(fail)?;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = PlaybackRequest::new(url).with_range(range);
    let gateway = gateway_stream_url(&ctx, &headers);

    relay::relay_stream(&ctx.fetcher, &request, &gateway)
        .await
        .map_err(fail)
}

/// GET /image?url=
pub async fn image(
    State(ctx): State<AppContext>,
    Query(query): Query<UrlQuery>,
    rid: Option<Extension<RequestId>>,
) -> Result<Response, AppError> {
    let rid = request_id(rid);
    let fail = |e| AppError::new(e).with_request_id(rid.clone());

    let url = require_url(query.url).map_err(fail)?;
    relay::relay_image(&ctx.fetcher, &url).await.map_err(fail)
}
