//! The CSV system of record.
//!
//! # Guarantees
//!
//! - Readers never see a partial file: every write goes to a temp file in the
//!   same directory and is renamed over the target.
//! - Writers are serialized by an exclusive lock on `{csv}.lock`, held across
//!   the whole read-modify-write of an update or append.
//! - A gzip backup of the current file is taken before each write when
//!   `auto_backup` is on.
//! - Write-path operations report success as `bool` and log the cause of a
//!   failure. Read operations return `Result`.

use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use rowtrack_core::{
    DownloadKind, DownloadResult, DownloadStatus, KindFilter, RowContext, Settings,
    sanitize_csv_field, sanitize_error_message,
};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::backup;
use crate::error::CsvError;
use crate::lock::{self, FileLockGuard};
use crate::mappings::{self, Mapping};
use crate::schema::{self, JSON_COLUMNS};
use crate::table::{CsvTable, Record, RowRef};

/// Behaviour switches for a [`CsvManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvManagerConfig {
    pub auto_backup: bool,
    /// Without the lock, concurrent appends from other processes can be lost.
    pub use_file_lock: bool,
    pub lock_timeout: Duration,
    pub lock_check_interval: Duration,
    pub max_field_length: usize,
    pub backup_dir: PathBuf,
    /// Backups kept per file; 0 keeps everything.
    pub backup_retention: usize,
}

impl CsvManagerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            auto_backup: settings.csv.auto_backup,
            use_file_lock: settings.csv.use_file_lock,
            lock_timeout: Duration::from_secs(settings.csv.lock_timeout_seconds),
            lock_check_interval: Duration::from_millis(settings.csv.lock_check_interval_ms),
            max_field_length: settings.csv.max_field_length,
            backup_dir: settings.backup_dir(),
            backup_retention: settings.csv.backup_retention,
        }
    }

    /// Defaults for a CSV at `csv_path`, backups under `backups/output` next to it.
    pub fn for_path(csv_path: &Path) -> Self {
        let mut settings = Settings::with_defaults();
        settings.paths.output_csv = csv_path.to_path_buf();
        Self::from_settings(&settings)
    }
}

/// Per-kind status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub streamed: usize,
    pub permanent: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub total_rows: usize,
    pub by_kind: BTreeMap<&'static str, KindCounts>,
}

/// One kind of work still owed to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKind {
    pub kind: DownloadKind,
    /// Links from the kind's link column, split on `|`.
    pub urls: Vec<String>,
    pub previous_status: DownloadStatus,
    pub attempts: u32,
}

/// A row with at least one kind of pending work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    pub context: RowContext,
    pub work: Vec<PendingKind>,
}

/// Identifies the on-disk file a cached table was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
    #[cfg(unix)]
    ino: u64,
}

impl Fingerprint {
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            #[cfg(unix)]
            ino: std::os::unix::fs::MetadataExt::ino(meta),
        }
    }
}

/// A table written to a temp file next to the target but not yet visible.
///
/// Dropping it without [`StagedWrite::commit`] deletes the temp file and
/// leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Atomically replace the target with the staged file.
    pub fn commit(self) -> Result<(), CsvError> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map(|_| ())
            .map_err(|e| CsvError::io(&target, &e.error))
    }
}

/// Database-like access to a single CSV file.
#[derive(Debug)]
pub struct CsvManager {
    path: PathBuf,
    config: CsvManagerConfig,
    cache: Mutex<Option<(Fingerprint, CsvTable)>>,
}

impl CsvManager {
    pub fn new(path: impl Into<PathBuf>, config: CsvManagerConfig) -> Self {
        Self {
            path: path.into(),
            config,
            cache: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.paths.output_csv.clone(),
            CsvManagerConfig::from_settings(settings),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn config(&self) -> &CsvManagerConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Load the whole table. All cells stay strings.
    pub fn read(&self) -> Result<CsvTable, CsvError> {
        let meta = fs::metadata(&self.path).map_err(|e| CsvError::io(&self.path, &e))?;
        let fingerprint = Fingerprint::of(&meta);
        {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((cached_fp, table)) = cache.as_ref() {
                if *cached_fp == fingerprint {
                    return Ok(table.clone());
                }
            }
        }
        let table = CsvTable::read_from(&self.path)?;
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((fingerprint, table.clone()));
        Ok(table)
    }

    /// Read straight from disk, bypassing the cache. Used under the lock.
    fn read_fresh(&self) -> Result<CsvTable, CsvError> {
        CsvTable::read_from(&self.path)
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// First row whose `row_id` matches, as a record.
    pub fn find_row_by_id(&self, row_id: &str) -> Result<Option<Record>, CsvError> {
        let table = self.read()?;
        Ok(table
            .find_by_id(row_id)
            .and_then(|i| table.row(i))
            .map(|r| r.to_record()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Replace the file with `table`.
    ///
    /// Fails (returns false) when any of `expected_columns` is missing.
    pub fn write(&self, table: &CsvTable, operation: &str, expected_columns: Option<&[&str]>) -> bool {
        let result = check_expected(table, expected_columns)
            .and_then(|()| self.with_lock(|| self.commit_table(table, operation)));
        self.report(operation, result)
    }

    /// Replace the file with `rows`, via temp file and rename.
    pub fn atomic_write(&self, rows: &[Record], fieldnames: Option<&[&str]>) -> bool {
        let table = CsvTable::from_records(rows, fieldnames);
        let result = self.with_lock(|| self.commit_table(&table, "atomic_write"));
        self.report("atomic_write", result)
    }

    /// Append `rows` to the existing file, creating it if needed.
    ///
    /// The existing table is read, extended and rewritten under one lock hold,
    /// so concurrent appenders never lose each other's rows.
    pub fn atomic_append(&self, rows: &[Record], fieldnames: Option<&[&str]>) -> bool {
        let result = self.with_lock(|| {
            let mut table = match self.read_fresh() {
                Ok(table) => table,
                Err(CsvError::NotFound(_)) => CsvTable::default(),
                Err(e) => return Err(e),
            };
            for name in fieldnames.unwrap_or_default() {
                table.add_column(name, "");
            }
            for record in rows {
                table.push_record(record);
            }
            self.commit_table(&table, "atomic_append")
        });
        self.report("atomic_append", result)
    }

    /// Add any missing schema columns. Creates the file when absent.
    pub fn ensure_tracking_columns(&self) -> bool {
        let result = self.with_lock(|| {
            let mut table = match self.read_fresh() {
                Ok(table) => table,
                Err(CsvError::NotFound(_)) => {
                    info!(path = %self.path.display(), "Creating CSV with tracking columns");
                    let table = CsvTable::with_columns(&schema::tracking_schema());
                    return self.commit_table(&table, "ensure_tracking_columns");
                }
                Err(e) => return Err(e),
            };

            let added = add_schema_columns(&mut table);
            if added.is_empty() {
                return Ok(());
            }
            info!(columns = %added.join(","), "Adding missing tracking columns");
            self.commit_table(&table, "add_tracking_columns")
        });
        self.report("ensure_tracking_columns", result)
    }

    /// Record the outcome of one download in the row at `row_index`.
    ///
    /// The row is re-read under the lock. When the row at that position no
    /// longer carries the result's `row_id`, the row is located by id instead.
    pub fn update_download_status(
        &self,
        row_index: usize,
        kind: DownloadKind,
        result: &DownloadResult,
    ) -> bool {
        let operation = format!("update_{kind}_status");
        let outcome = self.with_lock(|| {
            let mut table = self.read_fresh()?;
            let index = resolve_row(&table, row_index, result.row_context().row_id())?;
            for column in schema::update_columns(kind) {
                table.add_column(column, "");
            }
            apply_result(&mut table, index, kind, result, self.config.max_field_length);
            self.commit_table(&table, &operation)?;
            Ok(index)
        });

        match outcome {
            Ok(index) => {
                info!(
                    row_index = index,
                    row_id = %result.row_context().row_id(),
                    kind = %kind,
                    success = result.success(),
                    permanent = result.permanent_failure(),
                    "Recorded download status"
                );
                true
            }
            Err(e) => self.report::<()>(&operation, Err(e)),
        }
    }

    /// Merge new UUID mappings into a row's `s3_paths` and `file_uuids`.
    pub fn update_s3_mappings(&self, row_id: &str, s3_paths: &Mapping, file_uuids: &Mapping) -> bool {
        let result = self.with_lock(|| {
            let mut table = self.read_fresh()?;
            let index = table
                .find_by_id(row_id)
                .ok_or_else(|| CsvError::RowNotFound(row_id.to_string()))?;
            for column in JSON_COLUMNS {
                table.add_column(column, "{}");
            }
            for (column, additions) in [("s3_paths", s3_paths), ("file_uuids", file_uuids)] {
                let mut merged = mappings::parse_mapping(table.get(index, column).unwrap_or(""));
                merged.extend(additions.iter().map(|(k, v)| (k.clone(), v.clone())));
                table.set(index, column, mappings::format_mapping(&merged));
            }
            self.commit_table(&table, "update_s3_mappings")
        });
        self.report("update_s3_mappings", result)
    }

    /// Set cells of the row with `row_id`. Unknown columns are skipped.
    pub fn update_row_by_id(&self, row_id: &str, updates: &[(&str, &str)]) -> bool {
        let result = self.with_lock(|| {
            let mut table = self.read_fresh()?;
            let index = table
                .find_by_id(row_id)
                .ok_or_else(|| CsvError::RowNotFound(row_id.to_string()))?;
            for (column, value) in updates {
                if !table.set(index, column, *value) {
                    warn!(column, "Column not found in CSV, skipping update");
                }
            }
            self.commit_table(&table, "update_row")
        });
        self.report("update_row", result)
    }

    /// Convert legacy single-quoted mapping cells to JSON. Returns cells converted.
    pub fn migrate_legacy_mappings(&self) -> Result<usize, CsvError> {
        self.with_lock(|| {
            let mut table = self.read_fresh()?;
            let mut converted = 0;
            for index in 0..table.len() {
                for column in JSON_COLUMNS {
                    let legacy = table.get(index, column).and_then(mappings::parse_legacy_literal);
                    if let Some(mapping) = legacy {
                        table.set(index, column, mappings::format_mapping(&mapping));
                        converted += 1;
                    }
                }
            }
            if converted > 0 {
                self.commit_table(&table, "migrate_json")?;
                info!(converted, "Converted legacy mapping cells to JSON");
            }
            Ok(converted)
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Rows still owed a download, in file order.
    ///
    /// A kind is pending for a row when its status is empty or `pending`, or
    /// `failed` with `include_failed` and fewer than `retry_attempts`
    /// attempts so far. Kinds listed in `permanent_failure` are never
    /// pending. When the kind's link column exists, rows without a link are
    /// skipped for that kind.
    pub fn pending_work(
        &self,
        filter: KindFilter,
        include_failed: bool,
        retry_attempts: u32,
    ) -> Result<Vec<PendingRow>, CsvError> {
        let table = self.read()?;
        Ok(table
            .rows()
            .filter_map(|row| {
                let work: Vec<PendingKind> = filter
                    .kinds()
                    .iter()
                    .filter_map(|kind| pending_kind(&table, &row, *kind, include_failed, retry_attempts))
                    .collect();
                (!work.is_empty()).then(|| PendingRow {
                    context: row.to_context(),
                    work,
                })
            })
            .collect())
    }

    /// Contexts of rows with pending work. Each row appears once.
    ///
    /// Read failures are logged and yield an empty list.
    pub fn get_pending_downloads(
        &self,
        filter: KindFilter,
        include_failed: bool,
        retry_attempts: u32,
    ) -> Vec<RowContext> {
        match self.pending_work(filter, include_failed, retry_attempts) {
            Ok(rows) => rows.into_iter().map(|r| r.context).collect(),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to read pending downloads");
                Vec::new()
            }
        }
    }

    pub fn get_download_status_summary(&self) -> Result<StatusSummary, CsvError> {
        let table = self.read()?;
        let mut summary = StatusSummary {
            total_rows: table.len(),
            ..StatusSummary::default()
        };
        for kind in DownloadKind::ALL {
            let counts = summary.by_kind.entry(kind.as_str()).or_default();
            for row in table.rows() {
                if permanent_kinds(row.value("permanent_failure")).contains(&kind) {
                    counts.permanent += 1;
                }
                match DownloadStatus::parse(row.value(kind.status_column())) {
                    DownloadStatus::Empty | DownloadStatus::Pending => counts.pending += 1,
                    DownloadStatus::Completed => counts.completed += 1,
                    DownloadStatus::Failed => counts.failed += 1,
                    DownloadStatus::Streamed => counts.streamed += 1,
                    DownloadStatus::Unknown(_) => {}
                }
            }
        }
        Ok(summary)
    }

    pub fn validate_schema(&self, table: &CsvTable) -> Result<(), Vec<String>> {
        schema::validate_schema(table)
    }

    // ------------------------------------------------------------------
    // JSON sub-fields
    // ------------------------------------------------------------------

    pub fn load_s3_paths(row: &RowRef<'_>) -> Mapping {
        mappings::load_s3_paths(row)
    }

    pub fn load_file_uuids(row: &RowRef<'_>) -> Mapping {
        mappings::load_file_uuids(row)
    }

    pub fn save_s3_paths(mapping: &Mapping) -> String {
        mappings::save_s3_paths(mapping)
    }

    pub fn save_file_uuids(mapping: &Mapping) -> String {
        mappings::save_file_uuids(mapping)
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Gzip snapshot of the current file.
    pub fn create_backup(&self, operation: &str) -> Result<PathBuf, CsvError> {
        backup::create_backup(
            &self.path,
            &self.config.backup_dir,
            operation,
            self.config.backup_retention,
        )
    }

    /// Write `table` to a temp file beside the target without replacing it.
    pub fn stage(&self, table: &CsvTable) -> Result<StagedWrite, CsvError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| CsvError::io(&dir, &e))?;

        let prefix = format!(
            ".{}.",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("csv")
        );
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| CsvError::io(&dir, &e))?;

        table
            .write_to(BufWriter::new(temp.as_file_mut()))
            .map_err(|e| CsvError::from_csv(temp.path(), &e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| CsvError::io(temp.path(), &e))?;

        // The replacement keeps the target's mode; failing to copy it is not fatal.
        if let Ok(meta) = fs::metadata(&self.path)
            && let Err(e) = fs::set_permissions(temp.path(), meta.permissions())
        {
            debug!(
                path = %self.path.display(),
                temp = %temp.path().display(),
                error = %e,
                "Could not copy permissions onto staged CSV"
            );
        }

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }

    /// Backup (when enabled), stage, rename, invalidate. Caller holds the lock.
    fn commit_table(&self, table: &CsvTable, operation: &str) -> Result<(), CsvError> {
        if self.config.auto_backup && self.path.exists() {
            self.create_backup(operation)?;
        }
        let staged = self.stage(table)?;
        staged.commit()?;
        self.invalidate_cache();
        debug!(path = %self.path.display(), operation, rows = table.len(), "CSV written");
        Ok(())
    }

    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, CsvError>) -> Result<T, CsvError> {
        let _guard: Option<FileLockGuard> = if self.config.use_file_lock {
            Some(lock::acquire(
                &self.path,
                self.config.lock_timeout,
                self.config.lock_check_interval,
            )?)
        } else {
            None
        };
        f()
    }

    fn report<T>(&self, operation: &str, result: Result<T, CsvError>) -> bool {
        match result {
            Ok(_) => true,
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    operation,
                    error = %sanitize_error_message(&e.to_string(), self.config.max_field_length),
                    "CSV operation failed"
                );
                false
            }
        }
    }
}

fn check_expected(table: &CsvTable, expected: Option<&[&str]>) -> Result<(), CsvError> {
    let missing: Vec<String> = expected
        .unwrap_or_default()
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| (*c).to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(CsvError::MissingColumns(missing))
    }
}

/// Add every missing schema column. JSON columns default to `{}`.
fn add_schema_columns(table: &mut CsvTable) -> Vec<&'static str> {
    schema::tracking_schema()
        .into_iter()
        .filter(|column| {
            let default = if JSON_COLUMNS.contains(column) { "{}" } else { "" };
            table.add_column(column, default)
        })
        .collect()
}

fn resolve_row(table: &CsvTable, row_index: usize, row_id: &str) -> Result<usize, CsvError> {
    let row_id = row_id.trim();
    let matches_position = table
        .get(row_index, "row_id")
        .map_or(row_index < table.len(), |id| row_id.is_empty() || id.trim() == row_id);
    if matches_position {
        return Ok(row_index);
    }
    if !row_id.is_empty() {
        if let Some(found) = table.find_by_id(row_id) {
            warn!(row_index, found, row_id, "Row moved since it was read, updating by id");
            return Ok(found);
        }
    }
    if row_index >= table.len() {
        Err(CsvError::RowOutOfBounds {
            index: row_index,
            len: table.len(),
        })
    } else {
        Err(CsvError::RowNotFound(row_id.to_string()))
    }
}

fn apply_result(
    table: &mut CsvTable,
    index: usize,
    kind: DownloadKind,
    result: &DownloadResult,
    max_field_length: usize,
) {
    let summary = result.summary(Utc::now());

    table.set(index, kind.status_column(), summary.status.as_str());
    if result.success() {
        table.set(index, kind.files_column(), summary.files);
    }
    if !summary.media_id.is_empty() {
        table.set(index, kind.media_id_column(), summary.media_id);
    }

    let prefix = format!("{kind}:");
    if result.success() {
        if table.get(index, "download_errors").is_some_and(|e| e.starts_with(&prefix)) {
            table.set(index, "download_errors", "");
        }
    } else {
        let message = sanitize_error_message(&summary.error, max_field_length);
        table.set(
            index,
            "download_errors",
            sanitize_csv_field(&format!("{prefix} {message}"), max_field_length),
        );
    }

    table.set(index, "last_download_attempt", summary.last_attempt);

    let attempts = table
        .get(index, kind.attempts_column())
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(0);
    table.set(index, kind.attempts_column(), (attempts + 1).to_string());

    if result.permanent_failure() {
        let mut kinds = permanent_kinds(table.get(index, "permanent_failure").unwrap_or(""));
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
        let joined = kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",");
        table.set(index, "permanent_failure", joined);
    }
}

/// Kinds listed in a `permanent_failure` cell. Legacy truthy values mean all kinds.
fn permanent_kinds(cell: &str) -> Vec<DownloadKind> {
    let trimmed = cell.trim();
    if matches!(trimmed.to_ascii_lowercase().as_str(), "true" | "yes" | "1") {
        return DownloadKind::ALL.to_vec();
    }
    let mut kinds = Vec::new();
    for part in trimmed.split([',', ';', '|', ' ']) {
        if let Ok(kind) = part.parse::<DownloadKind>() {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }
    kinds
}

/// Split a link cell on `|`, dropping blanks and `nan`/`None`/`-` placeholders.
pub fn split_links(cell: &str) -> Vec<String> {
    cell.split('|')
        .map(str::trim)
        .filter(|l| !l.is_empty() && !matches!(*l, "nan" | "None" | "-" | "'-"))
        .map(str::to_string)
        .collect()
}

fn pending_kind(
    table: &CsvTable,
    row: &RowRef<'_>,
    kind: DownloadKind,
    include_failed: bool,
    retry_attempts: u32,
) -> Option<PendingKind> {
    if permanent_kinds(row.value("permanent_failure")).contains(&kind) {
        return None;
    }

    let status = DownloadStatus::parse(row.value(kind.status_column()));
    let attempts = row.value(kind.attempts_column()).trim().parse::<u32>().unwrap_or(0);
    let due = status.is_pending()
        || (include_failed && status == DownloadStatus::Failed && attempts < retry_attempts);
    if !due {
        return None;
    }

    let urls = split_links(row.value(kind.link_column()));
    if table.has_column(kind.link_column()) && urls.is_empty() {
        return None;
    }
    Some(PendingKind {
        kind,
        urls,
        previous_status: status,
        attempts,
    })
}
