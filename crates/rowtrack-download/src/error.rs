//! Collaborator errors and their retry classification.

use std::path::Path;
use std::time::Duration;

use rowtrack_core::{RateLimitError, StorageError};
use thiserror::Error;

/// Phrases in downloader output that mean the content is gone for good.
pub const PERMANENT_PHRASES: &[&str] = &[
    "video unavailable",
    "private video",
    "removed by uploader",
    "deleted",
    "video not available",
    "this video has been removed",
];

/// True when `message` contains any permanent-failure phrase.
pub fn is_permanent_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    PERMANENT_PHRASES.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to launch {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with status {code:?}: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The server answered with an HTML page where file content was expected.
    #[error("Received an HTML page instead of file content: {0}")]
    HtmlResponse(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid metadata file {path}: {message}")]
    Metadata { path: String, message: String },

    #[error("Download produced no files")]
    NoFiles,

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No request slot within the rate limiter's wait timeout. The row is
    /// left for a later run rather than retried in place.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
}

impl CollaboratorError {
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Retrying can never help.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::InvalidUrl(_) | Self::AccessDenied(_) => true,
            Self::HttpStatus { status, .. } => matches!(status, 403 | 404 | 410),
            Self::ExitStatus { stderr, .. } => is_permanent_message(stderr),
            _ => false,
        }
    }

    /// Worth another attempt within the same run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Http(_) | Self::NoFiles => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Self::ExitStatus { .. } => !self.is_permanent(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => Self::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            },
            _ => Self::Http(err.to_string()),
        }
    }
}
