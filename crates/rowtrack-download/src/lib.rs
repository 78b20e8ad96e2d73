//! Download and storage collaborators.
//!
//! Each collaborator implements a port from `rowtrack-core`:
//!
//! - [`YtDlpDownloader`] and [`DriveDownloader`] implement `MediaDownloader`
//! - [`LocalObjectStore`] implements `ObjectStore`
//!
//! All of them block; callers run them on worker threads.

pub mod drive;
pub mod error;
mod outcome;
pub mod process;
pub mod sidecar;
pub mod storage;
pub mod youtube;

pub use drive::{DriveConfig, DriveDownloader};
pub use error::{CollaboratorError, PERMANENT_PHRASES, is_permanent_message};
pub use process::{CommandOutput, run_command, run_with_timeout};
pub use sidecar::{SIDECAR_SUFFIX, find_sidecars, read_sidecar, write_sidecar};
pub use storage::{
    LocalObjectStore, OBJECT_PREFIX, UploadedArtifacts, detect_extension, object_key,
    upload_artifacts,
};
pub use youtube::{YtDlpConfig, YtDlpDownloader, extract_media_id};

/// Individual URLs in a link cell, split on `|`.
pub fn split_urls(cell: &str) -> impl Iterator<Item = &str> {
    cell.split('|').map(str::trim).filter(|s| !s.is_empty())
}
