//! UUID-keyed artifact storage.
//!
//! Every uploaded file gets a fresh UUID and lands under
//! `files/{uuid}.{ext}`. The caller records two mappings on the row:
//! file name to UUID (`file_uuids`) and UUID to object key (`s3_paths`).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use rowtrack_core::{ObjectStore, StorageError, UploadOutcome};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix shared by every artifact key.
pub const OBJECT_PREFIX: &str = "files";

/// Object key for an artifact: `files/{uuid}.{ext}`.
pub fn object_key(id: &Uuid, extension: &str) -> String {
    format!("{OBJECT_PREFIX}/{id}.{extension}")
}

/// Extension for a file, sniffed from its content first.
///
/// Falls back to the name's own extension, then `bin`.
pub fn detect_extension(path: &Path) -> String {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        return kind.extension().to_string();
    }
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}

/// Keys must be relative, `/`-separated, and free of `..`.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let clean = !key.is_empty()
        && !key.contains('\\')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if clean {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Object store on the local file system.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_file(&self, source: &Path, key: &str) -> Result<UploadOutcome, StorageError> {
        let started = Instant::now();
        let target = self.object_path(key)?;
        if !source.is_file() {
            return Err(StorageError::SourceMissing(source.display().to_string()));
        }
        let parent = target.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut staged =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        let mut reader = std::fs::File::open(source).map_err(|e| StorageError::Io(e.to_string()))?;
        let file_size = std::io::copy(&mut reader, staged.as_file_mut())
            .map_err(|e| StorageError::Io(e.to_string()))?;
        staged
            .as_file_mut()
            .flush()
            .map_err(|e| StorageError::Io(e.to_string()))?;
        staged
            .persist(&target)
            .map_err(|e| StorageError::Io(e.error.to_string()))?;

        Ok(UploadOutcome {
            success: true,
            s3_key: key.to_string(),
            s3_url: self.url_for(key),
            file_size,
            upload_time: started.elapsed().as_secs_f64(),
            error: None,
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.object_path(key).is_ok_and(|p| p.is_file())
    }

    fn url_for(&self, key: &str) -> String {
        format!("file://{}", self.root.join(key).display())
    }
}

/// Mappings produced by uploading one row's files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadedArtifacts {
    /// UUID to object key.
    pub s3_paths: BTreeMap<String, String>,
    /// File name to UUID.
    pub file_uuids: BTreeMap<String, String>,
    pub outcomes: Vec<UploadOutcome>,
}

impl UploadedArtifacts {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }
}

/// Upload `files` (names relative to `dir`) under fresh UUID keys.
///
/// Failed uploads are kept in `outcomes` but never enter the mappings.
pub fn upload_artifacts(store: &dyn ObjectStore, dir: &Path, files: &[String]) -> UploadedArtifacts {
    let mut uploaded = UploadedArtifacts::default();
    for name in files {
        let source = dir.join(name);
        let id = Uuid::new_v4();
        let key = object_key(&id, &detect_extension(&source));
        match store.put_file(&source, &key) {
            Ok(outcome) if outcome.success => {
                debug!(file = %name, key = %key, bytes = outcome.file_size, "Stored artifact");
                uploaded.s3_paths.insert(id.to_string(), key);
                uploaded.file_uuids.insert(name.clone(), id.to_string());
                uploaded.outcomes.push(outcome);
            }
            Ok(outcome) => {
                warn!(file = %name, key = %key, error = ?outcome.error, "Upload reported failure");
                uploaded.outcomes.push(outcome);
            }
            Err(e) => {
                warn!(file = %name, key = %key, error = %e, "Upload failed");
                uploaded.outcomes.push(UploadOutcome::failure(key, e.to_string()));
            }
        }
    }
    uploaded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("image.dat");
        std::fs::write(&png, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]).unwrap();
        assert_eq!(detect_extension(&png), "png");

        let text = dir.path().join("notes.TXT");
        std::fs::write(&text, "plain words").unwrap();
        assert_eq!(detect_extension(&text), "txt");

        let bare = dir.path().join("blob");
        std::fs::write(&bare, "x").unwrap();
        assert_eq!(detect_extension(&bare), "bin");
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "a").unwrap();
        for key in ["", "../x", "/abs/x", "files/../../x", "files\\x"] {
            assert!(
                matches!(store.put_file(&source, key), Err(StorageError::InvalidKey(_))),
                "{key}"
            );
        }
    }

    #[test]
    fn test_upload_artifacts_builds_both_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();
        std::fs::write(downloads.join("clip.mp4"), "video").unwrap();
        let store = LocalObjectStore::new(dir.path().join("storage"));

        let uploaded = upload_artifacts(
            &store,
            &downloads,
            &["clip.mp4".to_string(), "missing.pdf".to_string()],
        );
        assert_eq!(uploaded.failures(), 1);
        assert_eq!(uploaded.file_uuids.len(), 1);

        let id = &uploaded.file_uuids["clip.mp4"];
        let key = &uploaded.s3_paths[id];
        assert!(key.starts_with("files/"));
        assert!(store.exists(key));
        assert_eq!(std::fs::read_to_string(store.root().join(key)).unwrap(), "video");
    }
}
