//! `GET /result/{id}` — serve the metadata record for one upload.

use crate::{
    errors::{AppError, json_response},
    models::image_record::ImageMetadataResponse,
    services::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
};
use tracing::debug;

/// Look up the record for `id`; 404 until processing has written it.
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let Some(record) = state.table.get(&id).await? else {
        debug!(%id, "no metadata record yet");
        return Err(AppError::not_found("Metadata not found"));
    };

    Ok(json_response(
        StatusCode::OK,
        ImageMetadataResponse::from(record),
    ))
}
