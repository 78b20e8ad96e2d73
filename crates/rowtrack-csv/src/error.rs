//! Error types for the CSV layer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// File lock failures.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("Lock file error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl LockError {
    pub(crate) fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while reading or writing the CSV.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV file not found: {0}")]
    NotFound(PathBuf),

    #[error("Malformed CSV {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Missing expected columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Row index {index} out of bounds ({len} rows)")]
    RowOutOfBounds { index: usize, len: usize },

    #[error("Row id {0} not found")]
    RowNotFound(String),
}

impl CsvError {
    pub(crate) fn io(path: &Path, err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.to_path_buf());
        }
        Self::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn from_csv(path: &Path, err: &csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(io) => Self::io(path, io),
            _ => Self::Malformed {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    /// Whether retrying the same operation later might succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Lock(LockError::Timeout { .. }) | Self::Io { .. })
    }
}
