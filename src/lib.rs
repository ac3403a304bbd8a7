//! Image upload and metadata pipeline.
//!
//! Uploads land in a local blob store, an object-created notification drives
//! image inspection, and the resulting record is served back by identifier.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
