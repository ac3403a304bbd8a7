//! Core data models for the image pipeline.
//!
//! Blob metadata and image records map to SQLite tables via `sqlx::FromRow`
//! and serialize as JSON via `serde`.

pub mod event;
pub mod image_record;
pub mod object;
