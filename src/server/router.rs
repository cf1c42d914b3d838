//! Axum router construction.

use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::context::AppContext;
use super::middleware::request_id::request_id_middleware;
use super::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Passthrough
        .route("/stream", get(routes::stream::stream))
        .route("/image", get(routes::stream::image))
        // Subprocess-backed
        .route("/transcode", get(routes::transcode::transcode))
        .route("/remux", get(routes::transcode::remux))
        .route("/subtitle", get(routes::transcode::subtitle))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
