//! Gzip snapshots of the CSV taken before each write.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::CsvError;

/// Compress `source` into `backup_dir` as `{stem}_{timestamp}_{operation}.csv.gz`.
///
/// When `retention` is non-zero, older backups of the same file beyond that
/// count are deleted afterwards.
pub fn create_backup(
    source: &Path,
    backup_dir: &Path,
    operation: &str,
    retention: usize,
) -> Result<PathBuf, CsvError> {
    fs::create_dir_all(backup_dir).map_err(|e| CsvError::io(backup_dir, &e))?;

    let stem = file_stem(source);
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    let operation = clean_operation(operation);

    let input = File::open(source).map_err(|e| CsvError::io(source, &e))?;
    let (target, out) = open_unique(backup_dir, &format!("{stem}_{timestamp}_{operation}"))?;

    let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    std::io::copy(&mut BufReader::new(input), &mut encoder).map_err(|e| CsvError::io(&target, &e))?;
    encoder
        .finish()
        .and_then(|mut w| w.flush())
        .map_err(|e| CsvError::io(&target, &e))?;

    debug!(backup = %target.display(), "Created CSV backup");

    if retention > 0 {
        prune_backups(backup_dir, &stem, retention);
    }
    Ok(target)
}

/// Backups of `source` in `backup_dir`, oldest first.
pub fn list_backups(source: &Path, backup_dir: &Path) -> Vec<PathBuf> {
    let prefix = format!("{}_", file_stem(source));
    let Ok(entries) = fs::read_dir(backup_dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv.gz"))
        })
        .collect();
    // Timestamps are fixed-width, so name order is age order.
    found.sort();
    found
}

fn prune_backups(backup_dir: &Path, stem: &str, retention: usize) {
    let backups = list_backups(Path::new(&format!("{stem}.csv")), backup_dir);
    if backups.len() <= retention {
        return;
    }
    for old in &backups[..backups.len() - retention] {
        if let Err(e) = fs::remove_file(old) {
            warn!(path = %old.display(), error = %e, "Failed to prune old backup");
        }
    }
}

fn open_unique(dir: &Path, base: &str) -> Result<(PathBuf, File), CsvError> {
    for n in 0..100 {
        let name = if n == 0 {
            format!("{base}.csv.gz")
        } else {
            format!("{base}_{n}.csv.gz")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(CsvError::io(&path, &e)),
        }
    }
    Err(CsvError::Io {
        path: dir.join(base),
        message: "could not allocate a unique backup name".to_string(),
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

fn clean_operation(operation: &str) -> String {
    let cleaned: String = operation
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(40)
        .collect();
    if cleaned.is_empty() { "backup".to_string() } else { cleaned }
}
