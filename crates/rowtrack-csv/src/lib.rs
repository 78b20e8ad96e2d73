//! CSV system of record.
//!
//! The CSV file is the only state the pipeline keeps about a row. This crate
//! owns reading it, writing it atomically, serializing writers across
//! processes with a lock file, snapshotting it before every write, and the
//! JSON mappings stored inside its cells.

pub mod backup;
pub mod error;
pub mod lock;
pub mod manager;
pub mod mappings;
pub mod schema;
pub mod table;

pub use backup::{create_backup, list_backups};
pub use error::{CsvError, LockError};
pub use lock::{FileLockGuard, lock_path_for};
pub use manager::{
    CsvManager, CsvManagerConfig, KindCounts, PendingKind, PendingRow, StagedWrite, StatusSummary,
    split_links,
};
pub use mappings::{Mapping, format_mapping, parse_legacy_literal, parse_mapping};
pub use schema::{
    ColumnGroup, JSON_COLUMNS, REQUIRED_COLUMNS, required_columns, standard_columns, tracking_schema,
};
pub use table::{CsvTable, Record, RowRef};
