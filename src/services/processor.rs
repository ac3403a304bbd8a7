//! Processing step: turn a freshly stored upload into an `ImageRecord`.
//!
//! Triggered either by the blob store's in-process notifications (see
//! [`Processor::listen`]) or by an S3-style event posted over HTTP.

use crate::{
    models::{
        event::ObjectCreated,
        image_record::{ImageRecord, derive_extension},
    },
    services::{
        blob_store::{BlobStore, BlobStoreError},
        image_inspector,
        metadata_table::{MetadataTable, TableError},
    },
};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::types::Json;
use thiserror::Error;
use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::{JoinHandle, JoinSet},
};
use tracing::{error, info};

/// Prefix under which uploads are stored; the identifier follows it.
pub const UPLOAD_PREFIX: &str = "uploads/";

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("object key `{0}` is not of the form uploads/<id>")]
    UnexpectedKey(String),
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("image inspection task failed: {0}")]
    Inspect(#[from] tokio::task::JoinError),
}

/// Result reported back to whoever triggered processing.
#[derive(Debug, Serialize, PartialEq)]
pub struct ProcessingOutcome {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl ProcessingOutcome {
    pub fn ok() -> Self {
        Self {
            status_code: 200,
            body: Value::String("OK".into()),
        }
    }

    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": err.to_string() }),
        }
    }
}

impl From<Result<ImageRecord, ProcessingError>> for ProcessingOutcome {
    fn from(result: Result<ImageRecord, ProcessingError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(err) => Self::failed(err),
        }
    }
}

#[derive(Clone)]
pub struct Processor {
    blobs: BlobStore,
    table: MetadataTable,
}

impl Processor {
    pub fn new(blobs: BlobStore, table: MetadataTable) -> Self {
        Self { blobs, table }
    }

    /// Read the object, inspect it and write its record (last write wins).
    ///
    /// Image decoding problems never fail this call; only a bad key, a
    /// missing object or a table write error do.
    pub async fn process(&self, event: &ObjectCreated) -> Result<ImageRecord, ProcessingError> {
        let id = upload_id(&event.key)?.to_string();
        let (object, body) = self.blobs.get_object(&event.bucket, &event.key).await?;

        let details =
            tokio::task::spawn_blocking(move || image_inspector::inspect(&body)).await?;

        let filename = object.filename().map(str::to_string);
        let record = ImageRecord {
            id,
            extension: filename.as_deref().map(derive_extension),
            filename,
            size: object.size_bytes,
            content_type: object.content_type.clone(),
            upload_time: object.last_modified_iso(),
            s3_key: object.key.clone(),
            width: details.width.map(i64::from),
            height: details.height.map(i64::from),
            format: details.format,
            mode: details.mode,
            exif: Json(details.exif),
        };

        self.table.put(&record).await?;
        info!(
            id = %record.id,
            format = ?record.format,
            exif_tags = record.exif.len(),
            "image record written"
        );
        Ok(record)
    }

    /// Process one event and report it the way an event source expects.
    pub async fn handle(&self, event: &ObjectCreated) -> ProcessingOutcome {
        let outcome = ProcessingOutcome::from(self.process(event).await);
        if outcome.status_code != 200 {
            error!(bucket = %event.bucket, key = %event.key, body = %outcome.body, "processing failed");
        }
        outcome
    }

    /// Consume object-created notifications until the sender side is dropped.
    ///
    /// Each notification gets its own task so a slow decode never holds up
    /// other uploads. Once the channel closes, the returned handle resolves
    /// only after every in-flight task has finished.
    pub fn listen(self, mut rx: UnboundedReceiver<ObjectCreated>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            let processor = self.clone();
                            in_flight.spawn(async move {
                                processor.handle(&event).await;
                            });
                        }
                        None => break,
                    },
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        log_join_failure(joined);
                    }
                }
            }

            info!(pending = in_flight.len(), "object-created channel closed; draining processor");
            while let Some(joined) = in_flight.join_next().await {
                log_join_failure(joined);
            }
            info!("processor stopped");
        })
    }
}

fn log_join_failure(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(%err, "processing task did not complete");
    }
}

/// The identifier segment following `uploads/`.
pub fn upload_id(key: &str) -> Result<&str, ProcessingError> {
    key.strip_prefix(UPLOAD_PREFIX)
        .and_then(|rest| rest.split('/').next())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProcessingError::UnexpectedKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image_inspector::tests::{jpeg_with_exif, png_bytes};
    use bytes::Bytes;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::{collections::BTreeMap, sync::Arc};
    use tokio::sync::mpsc;

    const BUCKET: &str = "image-uploads";

    async fn fixture() -> (tempfile::TempDir, BlobStore, MetadataTable) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let pool = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .expect("failed to open in-memory sqlite"),
        );
        let blobs = BlobStore::new(pool.clone(), dir.path());
        blobs.ensure_schema().await.unwrap();
        let table = MetadataTable::new(pool, "image_metadata").unwrap();
        table.ensure_schema().await.unwrap();
        (dir, blobs, table)
    }

    async fn store(blobs: &BlobStore, id: &str, filename: Option<&str>, body: Vec<u8>) -> ObjectCreated {
        let key = format!("{UPLOAD_PREFIX}{id}");
        let metadata = filename
            .map(|name| BTreeMap::from([("filename".to_string(), name.to_string())]))
            .unwrap_or_default();
        blobs
            .put_object(BUCKET, &key, Bytes::from(body), "image/png", metadata)
            .await
            .unwrap();
        ObjectCreated {
            bucket: BUCKET.into(),
            key,
        }
    }

    #[test]
    fn upload_id_follows_prefix() {
        assert_eq!(upload_id("uploads/abc-123").unwrap(), "abc-123");
        assert_eq!(upload_id("uploads/abc/extra").unwrap(), "abc");
        assert!(upload_id("other/abc").is_err());
        assert!(upload_id("uploads/").is_err());
    }

    #[tokio::test]
    async fn valid_image_produces_full_record() {
        let (_dir, blobs, table) = fixture().await;
        let event = store(&blobs, "img-1", Some("cat.png"), png_bytes(5, 7)).await;

        let record = Processor::new(blobs, table.clone())
            .process(&event)
            .await
            .unwrap();

        assert_eq!(record.id, "img-1");
        assert_eq!(record.filename.as_deref(), Some("cat.png"));
        assert_eq!(record.extension.as_deref(), Some("png"));
        assert_eq!(record.s3_key, "uploads/img-1");
        assert_eq!((record.width, record.height), (Some(5), Some(7)));
        assert_eq!(record.format.as_deref(), Some("PNG"));
        assert_eq!(record.mode.as_deref(), Some("RGB"));
        assert!(record.upload_time.ends_with("+00:00"));
        assert_eq!(table.get("img-1").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn exif_is_captured_from_jpeg() {
        let (_dir, blobs, table) = fixture().await;
        let event = store(&blobs, "img-exif", Some("shot.jpeg"), jpeg_with_exif(8, 8)).await;

        let record = Processor::new(blobs, table).process(&event).await.unwrap();
        assert_eq!(record.format.as_deref(), Some("JPEG"));
        assert_eq!(record.extension.as_deref(), Some("jpeg"));
        assert_eq!(record.exif.get("Make").map(String::as_str), Some("Acme"));
    }

    #[tokio::test]
    async fn non_image_still_writes_record_with_nulls() {
        let (_dir, blobs, table) = fixture().await;
        let body = b"plain text, not pixels".to_vec();
        let len = body.len() as i64;
        let event = store(&blobs, "txt-1", Some("noext"), body).await;

        let outcome = Processor::new(blobs, table.clone()).handle(&event).await;
        assert_eq!(outcome, ProcessingOutcome::ok());

        let record = table.get("txt-1").await.unwrap().expect("record written");
        assert_eq!(record.extension.as_deref(), Some("noext"));
        assert_eq!(record.size, len);
        assert_eq!(record.width, None);
        assert_eq!(record.height, None);
        assert_eq!(record.format, None);
        assert_eq!(record.mode, None);
        assert!(record.exif.is_empty());
    }

    #[tokio::test]
    async fn missing_filename_metadata_leaves_name_fields_null() {
        let (_dir, blobs, table) = fixture().await;
        let event = store(&blobs, "anon", None, png_bytes(1, 1)).await;

        let record = Processor::new(blobs, table).process(&event).await.unwrap();
        assert_eq!(record.filename, None);
        assert_eq!(record.extension, None);
    }

    #[tokio::test]
    async fn reprocessing_overwrites_record() {
        let (_dir, blobs, table) = fixture().await;
        let event = store(&blobs, "again", Some("a.png"), png_bytes(2, 2)).await;
        let processor = Processor::new(blobs.clone(), table.clone());
        processor.process(&event).await.unwrap();

        store(&blobs, "again", Some("a.png"), png_bytes(9, 4)).await;
        processor.process(&event).await.unwrap();

        let record = table.get("again").await.unwrap().unwrap();
        assert_eq!((record.width, record.height), (Some(9), Some(4)));
    }

    #[tokio::test]
    async fn missing_object_reports_failure() {
        let (_dir, blobs, table) = fixture().await;
        let outcome = Processor::new(blobs, table)
            .handle(&ObjectCreated {
                bucket: BUCKET.into(),
                key: "uploads/ghost".into(),
            })
            .await;

        assert_eq!(outcome.status_code, 500);
        assert!(outcome.body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn table_write_failure_reports_error() {
        let (_dir, blobs, table) = fixture().await;
        let event = store(&blobs, "doomed", Some("d.png"), png_bytes(1, 1)).await;
        sqlx::query("DROP TABLE image_metadata")
            .execute(&*table.db)
            .await
            .unwrap();

        let outcome = Processor::new(blobs, table).handle(&event).await;
        assert_eq!(outcome.status_code, 500);
        assert!(outcome.body["error"].is_string());
    }

    #[tokio::test]
    async fn listener_processes_notifications() {
        let (_dir, blobs, table) = fixture().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Processor::new(blobs.clone(), table.clone()).listen(rx);

        let notifying = blobs.with_notifier(tx);
        store(&notifying, "live", Some("live.png"), png_bytes(3, 3)).await;

        let mut record = None;
        for _ in 0..100 {
            record = table.get("live").await.unwrap();
            if record.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(record.and_then(|r| r.width), Some(3));

        drop(notifying);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn listener_finishes_in_flight_work_after_channel_closes() {
        let (_dir, blobs, table) = fixture().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Processor::new(blobs.clone(), table.clone()).listen(rx);

        let notifying = blobs.with_notifier(tx);
        store(&notifying, "late-1", Some("a.png"), png_bytes(6, 2)).await;
        store(&notifying, "late-2", Some("b.jpeg"), jpeg_with_exif(4, 4)).await;
        drop(notifying);

        handle.await.unwrap();
        let first = table.get("late-1").await.unwrap().expect("record written before stop");
        assert_eq!((first.width, first.height), (Some(6), Some(2)));
        let second = table.get("late-2").await.unwrap().expect("record written before stop");
        assert_eq!(second.exif.get("Make").map(String::as_str), Some("Acme"));
    }
}
