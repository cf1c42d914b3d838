//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`streamrelay_common::Error`] so that route
//! handlers can return `Result<T, AppError>` and use `?` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use streamrelay_common::Error;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = self.inner.code(),
                error = %self.inner,
                "Server error in handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request failed");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}
