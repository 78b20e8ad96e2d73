//! CSV fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rowtrack::store::Record;
use rowtrack::{CsvManager, CsvManagerConfig};
use tempfile::TempDir;

/// Header used by most scenarios: identity columns, both link columns and
/// both status columns.
pub const HEADER: &str =
    "row_id,name,email,type,processed,youtube_playlist,youtube_status,google_drive,drive_status";

/// A CSV file in its own temp directory.
pub struct CsvFixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl CsvFixture {
    /// `HEADER` followed by `rows`.
    pub fn with_rows(rows: &str) -> Self {
        Self::with_text(&format!("{HEADER}\n{rows}\n"))
    }

    pub fn with_text(text: &str) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("output.csv");
        std::fs::write(&path, text).expect("write fixture");
        Self { dir, path }
    }

    /// Path inside the fixture directory that does not exist yet.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("output.csv");
        Self { dir, path }
    }

    pub fn manager(&self) -> CsvManager {
        manager_for(&self.path)
    }

    pub fn text(&self) -> String {
        std::fs::read_to_string(&self.path).expect("read fixture")
    }

    pub fn bytes(&self) -> Vec<u8> {
        std::fs::read(&self.path).expect("read fixture")
    }

    pub fn subdir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Manager with a generous lock timeout for tests that contend on the lock.
pub fn manager_for(path: &Path) -> CsvManager {
    let mut config = CsvManagerConfig::for_path(path);
    config.lock_timeout = Duration::from_secs(30);
    config.lock_check_interval = Duration::from_millis(5);
    CsvManager::new(path, config)
}

pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
