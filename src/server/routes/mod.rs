//! Route handlers.

pub mod stream;
pub mod transcode;

use axum::Extension;
use streamrelay_common::Error;

use super::middleware::request_id::RequestId;

/// The request ID assigned by the middleware, if it ran.
pub(crate) fn request_id(ext: Option<Extension<RequestId>>) -> Option<String> {
    ext.map(|Extension(RequestId(id))| id)
}

/// Require a non-empty `url` query parameter.
pub(crate) fn require_url(url: Option<String>) -> Result<String, Error> {
    match url {
        Some(url) if !url.trim().is_empty() => Ok(url.trim().to_string()),
        _ => Err(Error::Validation("URL parameter is required".into())),
    }
}
