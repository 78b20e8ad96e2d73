//! Metadata sidecars written next to downloaded files.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rowtrack_core::{DownloadResult, SidecarMetadata};

use crate::error::CollaboratorError;

/// File name suffix shared by every sidecar.
pub const SIDECAR_SUFFIX: &str = "_metadata.json";

/// Write the sidecar for `result` into `dir` and return its path.
///
/// Uses the result's own metadata file name when set, else the default
/// derived from media id and row. The file is replaced atomically.
pub fn write_sidecar(dir: &Path, result: &DownloadResult) -> Result<PathBuf, CollaboratorError> {
    let name = result
        .metadata_file()
        .map_or_else(|| result.default_metadata_filename(), ToString::to_string);
    let target = dir.join(name);

    let json = serde_json::to_vec_pretty(&result.to_sidecar(Utc::now())).map_err(|e| {
        CollaboratorError::Metadata {
            path: target.display().to_string(),
            message: e.to_string(),
        }
    })?;

    std::fs::create_dir_all(dir).map_err(|e| CollaboratorError::io(dir, &e))?;
    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| CollaboratorError::io(dir, &e))?;
    staged
        .write_all(&json)
        .and_then(|()| staged.flush())
        .map_err(|e| CollaboratorError::io(&target, &e))?;
    staged
        .persist(&target)
        .map_err(|e| CollaboratorError::io(&target, &e.error))?;
    Ok(target)
}

pub fn read_sidecar(path: &Path) -> Result<SidecarMetadata, CollaboratorError> {
    let bytes = std::fs::read(path).map_err(|e| CollaboratorError::io(path, &e))?;
    serde_json::from_slice(&bytes).map_err(|e| CollaboratorError::Metadata {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Sidecar files directly inside `dir`, sorted by name.
pub fn find_sidecars(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .is_some_and(|n| n.to_string_lossy().ends_with(SIDECAR_SUFFIX))
        })
        .collect();
    found.sort();
    found
}
