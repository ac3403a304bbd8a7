use crate::services::metadata_table::TableError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

/// Build a JSON response. CORS headers are added by the router's layer.
pub fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    (status, Json(body)).into_response()
}

/// An HTTP-facing error: a status plus the exact JSON body the client sees.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub body: Value,
}

impl AppError {
    /// Create a new AppError with a specific status and JSON body.
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    /// 400 with a `message` body.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, json!({ "message": message.into() }))
    }

    /// 404 with an `error` body.
    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, json!({ "error": error.into() }))
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": error.into() }),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.body)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), body = %self.body, "request failed");
        }
        json_response(self.status, self.body)
    }
}

impl From<TableError> for AppError {
    fn from(err: TableError) -> Self {
        AppError::internal(err.to_string())
    }
}
