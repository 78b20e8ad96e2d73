//! Column schema of the tracking CSV.

use rowtrack_core::DownloadKind;

use crate::table::CsvTable;

pub const REQUIRED_COLUMNS: &[&str] = &["row_id", "name", "processed"];
pub const TRACKING_COLUMNS: &[&str] = &[
    "s3_paths",
    "file_uuids",
    "download_errors",
    "last_download_attempt",
];
pub const YOUTUBE_COLUMNS: &[&str] = &[
    "youtube_playlist",
    "youtube_status",
    "youtube_files",
    "youtube_media_id",
];
pub const DRIVE_COLUMNS: &[&str] = &["google_drive", "drive_status", "drive_files", "drive_media_id"];
pub const OPTIONAL_COLUMNS: &[&str] = &["document_text", "extracted_links", "permanent_failure"];
/// Identity columns read into a `RowContext`.
pub const IDENTITY_COLUMNS: &[&str] = &["email", "type", "link"];
pub const ATTEMPT_COLUMNS: &[&str] = &["youtube_attempts", "drive_attempts"];

/// Columns holding JSON object text.
pub const JSON_COLUMNS: &[&str] = &["s3_paths", "file_uuids"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnGroup {
    Required,
    Tracking,
    Youtube,
    Drive,
    Optional,
    Identity,
    Attempts,
}

pub const fn columns_by_group(group: ColumnGroup) -> &'static [&'static str] {
    match group {
        ColumnGroup::Required => REQUIRED_COLUMNS,
        ColumnGroup::Tracking => TRACKING_COLUMNS,
        ColumnGroup::Youtube => YOUTUBE_COLUMNS,
        ColumnGroup::Drive => DRIVE_COLUMNS,
        ColumnGroup::Optional => OPTIONAL_COLUMNS,
        ColumnGroup::Identity => IDENTITY_COLUMNS,
        ColumnGroup::Attempts => ATTEMPT_COLUMNS,
    }
}

/// Required, tracking, per-kind and optional columns, in file order.
pub fn standard_columns() -> Vec<&'static str> {
    [
        REQUIRED_COLUMNS,
        TRACKING_COLUMNS,
        YOUTUBE_COLUMNS,
        DRIVE_COLUMNS,
        OPTIONAL_COLUMNS,
    ]
    .concat()
}

pub const fn required_columns() -> &'static [&'static str] {
    REQUIRED_COLUMNS
}

/// Every column the manager maintains: standard plus identity and attempts.
pub fn tracking_schema() -> Vec<&'static str> {
    let mut columns = standard_columns();
    columns.extend_from_slice(IDENTITY_COLUMNS);
    columns.extend_from_slice(ATTEMPT_COLUMNS);
    columns
}

/// Columns an update for `kind` writes to.
pub fn update_columns(kind: DownloadKind) -> [&'static str; 7] {
    [
        kind.status_column(),
        kind.files_column(),
        kind.media_id_column(),
        kind.attempts_column(),
        "download_errors",
        "last_download_attempt",
        "permanent_failure",
    ]
}

/// Check the table has every required column. Returns the missing ones.
pub fn validate_schema(table: &CsvTable) -> Result<(), Vec<String>> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| (*c).to_string())
        .collect();
    if missing.is_empty() { Ok(()) } else { Err(missing) }
}
