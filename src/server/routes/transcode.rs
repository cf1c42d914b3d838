//! `/transcode`, `/remux` and `/subtitle`: subprocess-backed output.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use streamrelay_av::TranscodeProfile;
use streamrelay_common::{ContentTypeHint, Error, PlaybackRequest};

use super::stream::UrlQuery;
use super::{request_id, require_url};
use crate::relay::fetcher::{parse_upstream_url, truncate_url};
use crate::server::context::AppContext;
use crate::server::error::AppError;
use crate::server::middleware::request_id::RequestId;

#[derive(Debug, Deserialize)]
pub struct TranscodeQuery {
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubtitleQuery {
    pub url: Option<String>,
    /// Kept as text so a bad value becomes a JSON 400 rather than a
    /// rejection from the extractor.
    pub index: Option<String>,
}

/// GET /transcode?url=&type=vod|live
pub async fn transcode(
    State(ctx): State<AppContext>,
    Query(query): Query<TranscodeQuery>,
    rid: Option<Extension<RequestId>>,
) -> Result<Response, AppError> {
    let rid = request_id(rid);
    let fail = |e| AppError::new(e).with_request_id(rid.clone());

    let url = require_url(query.url).map_err(fail)?;
    let hint = query
        .content_type
        .as_deref()
        .unwrap_or("")
        .parse::<ContentTypeHint>()
        .map_err(|e| fail(Error::Validation(e)))?;

    let request = PlaybackRequest::new(url).with_hint(hint);
    let profile = ctx.supervisor.transcode_profile(&request);
    run(&ctx, &request, profile).await.map_err(fail)
}

/// GET /remux?url=
pub async fn remux(
    State(ctx): State<AppContext>,
    Query(query): Query<UrlQuery>,
    rid: Option<Extension<RequestId>>,
) -> Result<Response, AppError> {
    let rid = request_id(rid);
    let fail = |e| AppError::new(e).with_request_id(rid.clone());

    let url = require_url(query.url).map_err(fail)?;
    let request = PlaybackRequest::new(url);
    run(&ctx, &request, TranscodeProfile::remux())
        .await
        .map_err(fail)
}

/// GET /subtitle?url=&index=
pub async fn subtitle(
    State(ctx): State<AppContext>,
    Query(query): Query<SubtitleQuery>,
    rid: Option<Extension<RequestId>>,
) -> Result<Response, AppError> {
    let rid = request_id(rid);
    let fail = |e| AppError::new(e).with_request_id(rid.clone());

    let url = require_url(query.url).map_err(fail)?;
    let index = parse_track_index(query.index.as_deref()).map_err(fail)?;

    let request = PlaybackRequest::new(url).with_subtitle_track(index);
    run(&ctx, &request, TranscodeProfile::subtitle(index))
        .await
        .map_err(fail)
}

fn parse_track_index(raw: Option<&str>) -> Result<u32, Error> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("Subtitle index parameter is required".into()))?;
    raw.parse::<u32>()
        .map_err(|_| Error::Validation(format!("Invalid subtitle index: {raw}")))
}

/// Drive one supervisor session up to its first byte, then stream the rest.
///
/// Headers are held back until output exists, so a subprocess that dies
/// before producing anything still surfaces as a JSON error.
async fn run(
    ctx: &AppContext,
    request: &PlaybackRequest,
    profile: TranscodeProfile,
) -> Result<Response, Error> {
    parse_upstream_url(&request.origin_url)?;

    tracing::info!(
        url = %truncate_url(&request.origin_url),
        profile = %profile.kind,
        "Transcode request"
    );

    let mut session = ctx.supervisor.open(request, &profile).await?;
    let first = session.first_chunk().await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static(profile.content_type()))
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-content-type-options", "nosniff");
    if profile.advertises_ranges() {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }

    builder
        .body(Body::from_stream(session.into_stream(first)))
        .map_err(|e| Error::Internal(format!("Failed to build response: {e}")))
}
