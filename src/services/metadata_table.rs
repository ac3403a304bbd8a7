//! MetadataTable — the key-value table holding one `ImageRecord` per upload.
//!
//! The table name is configurable, so it is checked once as a plain SQL
//! identifier at construction and interpolated into statements after that.

use crate::models::image_record::ImageRecord;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table name `{0}` is not a valid identifier")]
    InvalidTableName(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type TableResult<T> = Result<T, TableError>;

const MAX_TABLE_NAME_LEN: usize = 64;
const COLUMNS: &str = "id, filename, extension, size, content_type, upload_time, s3_key, \
                       width, height, format, mode, exif";

#[derive(Clone)]
pub struct MetadataTable {
    pub db: Arc<SqlitePool>,
    table: String,
}

impl MetadataTable {
    pub fn new(db: Arc<SqlitePool>, table: impl Into<String>) -> TableResult<Self> {
        let table = table.into();
        if !is_valid_identifier(&table) {
            return Err(TableError::InvalidTableName(table));
        }
        Ok(Self { db, table })
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    /// Create the table if it does not exist yet.
    pub async fn ensure_schema(&self) -> TableResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id           TEXT    PRIMARY KEY NOT NULL,
                filename     TEXT,
                extension    TEXT,
                size         INTEGER NOT NULL,
                content_type TEXT    NOT NULL,
                upload_time  TEXT    NOT NULL,
                s3_key       TEXT    NOT NULL,
                width        INTEGER,
                height       INTEGER,
                format       TEXT,
                mode         TEXT,
                exif         TEXT    NOT NULL DEFAULT '{{}}'
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&*self.db).await?;
        Ok(())
    }

    /// Insert or replace the record for `record.id` (last write wins).
    pub async fn put(&self, record: &ImageRecord) -> TableResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.filename)
            .bind(&record.extension)
            .bind(record.size)
            .bind(&record.content_type)
            .bind(&record.upload_time)
            .bind(&record.s3_key)
            .bind(record.width)
            .bind(record.height)
            .bind(&record.format)
            .bind(&record.mode)
            .bind(&record.exif)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Look up a record by identifier.
    pub async fn get(&self, id: &str) -> TableResult<Option<ImageRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?", self.table);
        let record = sqlx::query_as::<_, ImageRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }
}

/// ASCII letter or `_` first, then letters, digits or `_`.
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_TABLE_NAME_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
