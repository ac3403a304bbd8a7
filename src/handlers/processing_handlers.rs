//! `POST /events/object-created` — run the processing step for an S3-style event.
//!
//! The same step runs automatically for every upload; this endpoint exists
//! for external event sources and for re-processing an existing object.

use crate::{
    errors::json_response,
    models::event::StorageEvent,
    services::{AppState, processor::ProcessingOutcome},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
};
use tracing::warn;

/// Process the first record of the event and mirror its status code.
///
/// A payload that does not parse as an event is reported as a failed outcome.
pub async fn object_created(
    State(state): State<AppState>,
    event: Result<Json<StorageEvent>, JsonRejection>,
) -> Response {
    let outcome = match event {
        Ok(Json(event)) => match event.first_object() {
            Some(object) => state.processor.handle(&object).await,
            None => ProcessingOutcome::failed("event contains no records"),
        },
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected object-created event");
            ProcessingOutcome::failed(rejection.body_text())
        }
    };

    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, outcome)
}
