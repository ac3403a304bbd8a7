pub mod blob_store;
pub mod image_inspector;
pub mod metadata_table;
pub mod processor;

use blob_store::BlobStore;
use metadata_table::MetadataTable;
use processor::Processor;

/// Long-lived service handles shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub blobs: BlobStore,
    pub table: MetadataTable,
    pub processor: Processor,
    /// Bucket that receives uploads.
    pub upload_bucket: String,
    /// Largest request body `/upload` will read.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        blobs: BlobStore,
        table: MetadataTable,
        upload_bucket: impl Into<String>,
        max_upload_bytes: usize,
    ) -> Self {
        let processor = Processor::new(blobs.clone(), table.clone());
        Self {
            blobs,
            table,
            processor,
            upload_bucket: upload_bucket.into(),
            max_upload_bytes,
        }
    }
}
