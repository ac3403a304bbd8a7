//! Defines the HTTP surface of the pipeline.
//!
//! ## Structure
//! - `POST /upload` — store the first file part of a multipart body
//! - `GET  /result/{id}` — metadata written by the processing step
//! - `POST /events/object-created` — run processing for an S3-style event
//! - `GET  /healthz`, `GET /readyz` — liveness and readiness

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        processing_handlers::object_created,
        results_handlers::get_result,
        upload_handlers::upload_image,
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

/// Build the router; handlers share `AppState`.
///
/// `/upload` enforces its own size cap from `AppState::max_upload_bytes`,
/// so the extractor default limit is lifted there. Every response, including
/// axum's own rejections, gets permissive CORS headers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::disable()),
        )
        .route("/result/{id}", get(get_result))
        .route("/events/object-created", post(object_created))
        .layer(CorsLayer::permissive())
}
