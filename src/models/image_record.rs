//! The metadata record written by the processing step and served by `/result/{id}`.

use serde::Serialize;
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;

/// EXIF tags keyed by their resolved tag name.
pub type ExifTags = BTreeMap<String, String>;

/// One row of the metadata table. Clients see it as `ImageMetadataResponse`.
#[derive(Clone, FromRow, Debug, PartialEq)]
pub struct ImageRecord {
    pub id: String,

    pub filename: Option<String>,

    pub extension: Option<String>,

    /// Blob length in bytes.
    pub size: i64,

    pub content_type: String,

    /// ISO-8601 last-modified time of the blob.
    pub upload_time: String,

    pub s3_key: String,

    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
    pub mode: Option<String>,

    pub exif: Json<ExifTags>,
}

/// What the decoder learned about the bytes. All `None` when decoding failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageDetails {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub mode: Option<String>,
    pub exif: ExifTags,
}

/// Response body of `GET /result/{id}`.
#[derive(Serialize, Debug)]
pub struct ImageMetadataResponse {
    #[serde(rename = "Id")]
    pub id: String,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size: i64,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "uploadTime")]
    pub upload_time: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub mode: Option<String>,
    pub format: Option<String>,
    #[serde(rename = "s3Key")]
    pub s3_key: String,
    pub exif: ExifTags,
}

impl From<ImageRecord> for ImageMetadataResponse {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            filename: record.filename,
            extension: record.extension,
            size: record.size,
            content_type: record.content_type,
            upload_time: record.upload_time,
            width: record.width,
            height: record.height,
            mode: record.mode,
            format: record.format,
            s3_key: record.s3_key,
            exif: record.exif.0,
        }
    }
}

/// Extension as the substring after the last `.`; the whole name when there is no dot.
pub fn derive_extension(filename: &str) -> String {
    filename
        .rsplit('.')
        .next()
        .unwrap_or(filename)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_last_dot_segment() {
        assert_eq!(derive_extension("photo.jpeg"), "jpeg");
        assert_eq!(derive_extension("archive.tar.gz"), "gz");
    }

    #[test]
    fn extension_without_dot_is_whole_filename() {
        assert_eq!(derive_extension("noext"), "noext");
    }

    #[test]
    fn trailing_dot_yields_empty_extension() {
        assert_eq!(derive_extension("weird."), "");
    }

    #[test]
    fn response_renames_exif_and_keeps_numbers() {
        let mut exif = ExifTags::new();
        exif.insert("Make".into(), "Acme".into());
        let record = ImageRecord {
            id: "abc".into(),
            filename: Some("cat.png".into()),
            extension: Some("png".into()),
            size: 1234,
            content_type: "image/png".into(),
            upload_time: "2025-01-02T03:04:05+00:00".into(),
            s3_key: "uploads/abc".into(),
            width: Some(3),
            height: Some(2),
            format: Some("PNG".into()),
            mode: Some("RGB".into()),
            exif: Json(exif),
        };

        let value = serde_json::to_value(ImageMetadataResponse::from(record)).unwrap();
        assert_eq!(value["Id"], "abc");
        assert_eq!(value["size"], 1234);
        assert_eq!(value["width"], 3);
        assert_eq!(value["exif"]["Make"], "Acme");
        assert!(value.get("EXIF").is_none());
    }
}
