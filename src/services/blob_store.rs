//! src/services/blob_store.rs
//!
//! BlobStore — object storage backed by SQLite for object metadata and local
//! disk for payloads sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`.
//! Every successful write publishes an `ObjectCreated` notification, which is
//! what drives the processing step.

use crate::models::{event::ObjectCreated, object::BlobObject};
use bytes::Bytes;
use chrono::Utc;
use md5::Context;
use sqlx::{SqlitePool, types::Json};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::mpsc::UnboundedSender,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// BlobStore provides the two object operations the pipeline needs:
/// - Put an object (writes bytes to disk, upserts metadata, notifies)
/// - Get an object (reads metadata from SQLite and payload from disk)
#[derive(Clone)]
pub struct BlobStore {
    /// Shared SQLite connection pool used for object metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    notifier: Option<UnboundedSender<ObjectCreated>>,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blob_objects (
    bucket        TEXT    NOT NULL,
    key           TEXT    NOT NULL,
    content_type  TEXT    NOT NULL,
    size_bytes    INTEGER NOT NULL,
    etag          TEXT    NOT NULL,
    last_modified TEXT    NOT NULL,
    metadata      TEXT    NOT NULL DEFAULT '{}',
    PRIMARY KEY (bucket, key)
)
"#;

impl BlobStore {
    /// Create a new BlobStore backed by the provided SQLite pool and
    /// using `base_path` as the root directory for object payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            notifier: None,
        }
    }

    /// Publish an `ObjectCreated` on `tx` after every successful put.
    pub fn with_notifier(mut self, tx: UnboundedSender<ObjectCreated>) -> Self {
        self.notifier = Some(tx);
        self
    }

    /// Create the metadata table if it does not exist yet.
    pub async fn ensure_schema(&self) -> BlobStoreResult<()> {
        sqlx::query(SCHEMA).execute(&*self.db).await?;
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> BlobStoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(BlobStoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobStoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobStoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Construct a fully-qualified object payload path.
    ///
    /// Combines base_path/bucket/{shard}/{shard}/{key}, the shards being the
    /// first two bytes of MD5(bucket/key). Parent directories may not exist yet.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        let mut path = self.base_path.clone();
        path.push(bucket);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(key);
        path
    }

    /// Write an object to disk and upsert its metadata.
    ///
    /// - Writes bytes to a temporary file, fsyncs, renames into place.
    /// - Upserts the metadata row (overwrite semantics).
    /// - Publishes `ObjectCreated` once both are durable.
    ///
    /// On a metadata failure the payload is removed again so no half-written
    /// object stays visible.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: BTreeMap<String, String>,
    ) -> BlobStoreResult<BlobObject> {
        validate_bucket_name(bucket)?;
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_durably(&tmp_path, &body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobStoreError::Io(err));
        }

        let mut digest = Context::new();
        digest.consume(&body);
        let etag = format!("{:x}", digest.compute());

        let insert_result = sqlx::query_as::<_, BlobObject>(
            r#"
            INSERT INTO blob_objects (
                bucket, key, content_type, size_bytes, etag, last_modified, metadata
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                metadata = excluded.metadata
            RETURNING bucket, key, content_type, size_bytes, etag, last_modified, metadata
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(body.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .bind(Json(metadata))
        .fetch_one(&*self.db)
        .await;

        let object = match insert_result {
            Ok(obj) => obj,
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                return Err(BlobStoreError::Sqlx(err));
            }
        };

        debug!(bucket, key, size = object.size_bytes, "stored object");
        self.notify(&object);
        Ok(object)
    }

    /// Fetch object metadata together with its full payload.
    ///
    /// Returns ObjectNotFound if either the row or the payload file is missing.
    pub async fn get_object(&self, bucket: &str, key: &str) -> BlobStoreResult<(BlobObject, Bytes)> {
        self.ensure_key_safe(key)?;
        let not_found = || BlobStoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let object = sqlx::query_as::<_, BlobObject>(
            "SELECT bucket, key, content_type, size_bytes, etag, last_modified, metadata
             FROM blob_objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(not_found)?;

        let body = fs::read(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    not_found()
                } else {
                    BlobStoreError::Io(err)
                }
            })?;

        Ok((object, Bytes::from(body)))
    }

    fn notify(&self, object: &BlobObject) {
        let Some(tx) = &self.notifier else {
            return;
        };
        let event = ObjectCreated {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
        };
        if tx.send(event).is_err() {
            warn!(
                bucket = %object.bucket,
                key = %object.key,
                "object-created listener is gone; object will not be processed"
            );
        }
    }
}

async fn write_durably(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Validate bucket name format.
///
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
pub fn validate_bucket_name(name: &str) -> BlobStoreResult<()> {
    let invalid = |reason: &str| BlobStoreError::InvalidBucketName {
        name: name.to_string(),
        reason: reason.into(),
    };

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid("must be between 3 and 63 characters"));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(invalid(
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(&['.', '-'][..]) || name.ends_with(&['.', '-'][..]) {
        return Err(invalid("must start and end with a lowercase letter or digit"));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(invalid(
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::mpsc;

    async fn test_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("failed to open in-memory sqlite");
        let store = BlobStore::new(Arc::new(pool), dir.path());
        store.ensure_schema().await.expect("schema");
        (dir, store)
    }

    fn filename_meta(name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("filename".to_string(), name.to_string())])
    }

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let (_dir, store) = test_store().await;

        let stored = store
            .put_object(
                "image-uploads",
                "uploads/abc",
                Bytes::from_static(b"hello world"),
                "text/plain",
                filename_meta("hello.txt"),
            )
            .await
            .unwrap();
        assert_eq!(stored.size_bytes, 11);
        assert_eq!(stored.etag, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let (object, body) = store.get_object("image-uploads", "uploads/abc").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello world"));
        assert_eq!(object.content_type, "text/plain");
        assert_eq!(object.filename(), Some("hello.txt"));
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let (_dir, store) = test_store().await;

        for payload in [&b"first"[..], &b"second payload"[..]] {
            store
                .put_object(
                    "image-uploads",
                    "uploads/same",
                    Bytes::copy_from_slice(payload),
                    "application/octet-stream",
                    BTreeMap::new(),
                )
                .await
                .unwrap();
        }

        let (object, body) = store.get_object("image-uploads", "uploads/same").await.unwrap();
        assert_eq!(&body[..], b"second payload");
        assert_eq!(object.size_bytes, 14);
        assert_eq!(object.filename(), None);
    }

    #[tokio::test]
    async fn put_publishes_object_created() {
        let (_dir, store) = test_store().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = store.with_notifier(tx);

        store
            .put_object(
                "image-uploads",
                "uploads/evt",
                Bytes::from_static(b"x"),
                "image/png",
                BTreeMap::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ObjectCreated {
                bucket: "image-uploads".into(),
                key: "uploads/evt".into(),
            })
        );
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let (_dir, store) = test_store().await;
        let err = store
            .get_object("image-uploads", "uploads/missing")
            .await
            .unwrap_err();
        assert!(matches!(err, BlobStoreError::ObjectNotFound { .. }));
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = test_store().await;
        for key in ["", "/etc/passwd", "uploads/../x", "a\\b"] {
            let err = store
                .put_object("image-uploads", key, Bytes::new(), "x/y", BTreeMap::new())
                .await
                .unwrap_err();
            assert!(matches!(err, BlobStoreError::InvalidObjectKey), "key {key:?}");
        }
    }

    #[test]
    fn bucket_name_rules() {
        assert!(validate_bucket_name("image-uploads").is_ok());
        assert!(validate_bucket_name("my.bucket.1").is_ok());
        for bad in ["ab", "Upper", "-lead", "trail.", "a..b", "a.-b", "under_score"] {
            assert!(validate_bucket_name(bad).is_err(), "{bad} should be rejected");
        }
    }
}
