//! `POST /upload` — accept a multipart body and store its first file part.

use crate::{
    errors::{AppError, json_response},
    models::object::FILENAME_METADATA_KEY,
    services::{AppState, processor::UPLOAD_PREFIX},
};
use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header, request::Parts},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "Id")]
    pub id: String,
    pub message: &'static str,
}

/// The file part picked out of a multipart body.
#[derive(Debug)]
struct FilePart {
    filename: String,
    content_type: String,
    data: Bytes,
}

/// Upload a file to `uploads/<uuid>` in the upload bucket.
///
/// The body may be raw multipart or base64-encoded multipart.
pub async fn upload_image(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, state.max_upload_bytes)
        .await
        .map_err(|err| {
            AppError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({ "message": "Upload exceeds the size limit", "error": err.to_string() }),
            )
        })?;

    let file = match read_file_part(parts, body).await? {
        Some(file) => file,
        None => return Err(AppError::bad_request("No file found in the request")),
    };

    let id = Uuid::new_v4().to_string();
    let key = format!("{UPLOAD_PREFIX}{id}");
    let metadata = BTreeMap::from([(FILENAME_METADATA_KEY.to_string(), file.filename.clone())]);
    let size = file.data.len();

    state
        .blobs
        .put_object(&state.upload_bucket, &key, file.data, &file.content_type, metadata)
        .await
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "message": "Error uploading file", "error": err.to_string() }),
            )
        })?;

    info!(%id, filename = %file.filename, size, "upload stored");
    Ok(json_response(
        StatusCode::OK,
        UploadResponse {
            id,
            message: "File uploaded successfully",
        },
    ))
}

/// Decode the body and return the first part that carries a filename.
async fn read_file_part(mut parts: Parts, body: Bytes) -> Result<Option<FilePart>, AppError> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = multipart_boundary(content_type)
        .ok_or_else(|| invalid_multipart("missing multipart boundary in Content-Type"))?;

    let decoded = decode_body(body, boundary)
        .map_err(|err| invalid_multipart(format!("body is neither multipart nor base64: {err}")))?;
    debug!(bytes = decoded.len(), "decoded upload body");

    // The decoded length no longer matches what the client declared.
    parts.headers.remove(header::CONTENT_LENGTH);
    let request = Request::from_parts(parts, Body::from(decoded));
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| invalid_multipart(rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| invalid_multipart(err.body_text()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field
            .content_type()
            .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|err| invalid_multipart(err.body_text()))?;

        return Ok(Some(FilePart {
            filename,
            content_type,
            data,
        }));
    }

    Ok(None)
}

fn invalid_multipart(error: impl Into<String>) -> AppError {
    AppError::new(
        StatusCode::BAD_REQUEST,
        json!({ "message": "Invalid multipart request", "error": error.into() }),
    )
}

/// Extract the `boundary` parameter of a `multipart/form-data` content type.
fn multipart_boundary(content_type: &str) -> Option<&str> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .split(';')
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Raw multipart passes through; anything else is treated as base64.
///
/// The base64 alphabet has no `-`, so a body containing the `--boundary`
/// delimiter can only be raw.
fn decode_body(body: Bytes, boundary: &str) -> Result<Bytes, base64::DecodeError> {
    let delimiter = format!("--{boundary}");
    if body
        .windows(delimiter.len())
        .any(|window| window == delimiter.as_bytes())
    {
        return Ok(body);
    }
    general_purpose::STANDARD
        .decode(body.trim_ascii())
        .map(Bytes::from)
}
