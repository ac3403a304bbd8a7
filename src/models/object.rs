//! Represents an object (blob) stored in the upload bucket.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, types::Json};
use std::collections::BTreeMap;

/// Metadata key recording the client-supplied filename of an upload.
pub const FILENAME_METADATA_KEY: &str = "filename";

/// Stored metadata for a single blob.
///
/// The payload bytes live on disk; this row holds everything the processing
/// step needs to know about them without reading the file.
#[derive(Clone, FromRow, Debug)]
pub struct BlobObject {
    /// Bucket the object belongs to.
    pub bucket: String,

    /// Object key (path-like identifier within the bucket, e.g. `uploads/<id>`).
    pub key: String,

    /// Content type (MIME type) recorded at write time.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: String,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// User metadata attached at write time.
    pub metadata: Json<BTreeMap<String, String>>,
}

impl BlobObject {
    /// The original filename, if the uploader recorded one.
    pub fn filename(&self) -> Option<&str> {
        self.metadata
            .get(FILENAME_METADATA_KEY)
            .map(String::as_str)
    }

    /// `last_modified` as ISO-8601 with an explicit `+00:00` offset.
    pub fn last_modified_iso(&self) -> String {
        self.last_modified
            .to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}
