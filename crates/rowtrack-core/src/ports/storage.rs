//! Object storage port.
//!
//! Artifacts are stored under UUID keys (`files/{uuid}.{ext}`); the mapping
//! back to the row lives in the CSV's `s3_paths`/`file_uuids` columns.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Source file not found: {0}")]
    SourceMissing(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Result of one upload, as recorded by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub success: bool,
    pub s3_key: String,
    pub s3_url: String,
    pub file_size: u64,
    /// Seconds spent uploading.
    pub upload_time: f64,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn failure(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            s3_key: key.into(),
            s3_url: String::new(),
            file_size: 0,
            upload_time: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Port for storing artifacts under a key.
pub trait ObjectStore: Send + Sync {
    /// Store the file at `source` under `key`.
    fn put_file(&self, source: &Path, key: &str) -> Result<UploadOutcome, StorageError>;

    /// Whether an object exists under `key`.
    fn exists(&self, key: &str) -> bool;

    /// Public URL (or URI) for a key.
    fn url_for(&self, key: &str) -> String;
}
