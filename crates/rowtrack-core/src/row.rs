//! Row identity and download outcome contracts.
//!
//! A [`RowContext`] travels with every download so each artifact can be traced
//! back to the spreadsheet row it came from. Collaborators answer with a
//! [`DownloadResult`], which is persisted into the CSV and embedded into a
//! metadata sidecar next to the downloaded files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{DownloadKind, DownloadStatus};

/// Version stamp written into every sidecar record.
pub const TRACKING_VERSION: &str = "1.0";

/// Identity of one CSV row for the duration of a download attempt.
///
/// Built fresh from each row read and never mutated afterwards; there are
/// no setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowContext {
    row_id: String,
    row_index: usize,
    row_type: String,
    name: String,
    email: String,
}

impl RowContext {
    pub fn new(
        row_id: impl Into<String>,
        row_index: usize,
        row_type: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            row_id: row_id.into(),
            row_index,
            row_type: row_type.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Stable external key from the `row_id` column.
    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    /// Zero-based position of the row in the table when it was read.
    pub const fn row_index(&self) -> usize {
        self.row_index
    }

    /// The row's classification label, carried verbatim.
    pub fn row_type(&self) -> &str {
        &self.row_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Suffix used in artifact file names: `_row{row_id}_{clean_type}`.
    pub fn filename_suffix(&self) -> String {
        let clean_type: String = self
            .row_type
            .replace('/', "-")
            .replace(' ', "_")
            .replace('#', "num")
            .chars()
            .filter(|c| *c != '(' && *c != ')')
            .collect();
        format!("_row{}_{clean_type}", self.row_id)
    }

    /// Short, file-system safe prefix derived from the person's name.
    pub fn safe_name_prefix(&self) -> String {
        let kept: String = self
            .name
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
            .collect();
        kept.trim().replace(' ', "_").chars().take(20).collect()
    }

    /// Identity block embedded into sidecar metadata.
    pub fn to_metadata(&self, timestamp: DateTime<Utc>) -> RowIdentity {
        RowIdentity {
            source_csv_row_id: self.row_id.clone(),
            source_csv_index: self.row_index,
            personality_type: self.row_type.clone(),
            person_name: self.name.clone(),
            person_email: self.email.clone(),
            download_timestamp: timestamp.to_rfc3339(),
            tracking_version: TRACKING_VERSION.to_string(),
        }
    }

    /// Rebuild a context from a sidecar identity block.
    pub fn from_metadata(identity: &RowIdentity) -> Self {
        Self::new(
            identity.source_csv_row_id.clone(),
            identity.source_csv_index,
            identity.personality_type.clone(),
            identity.person_name.clone(),
            identity.person_email.clone(),
        )
    }
}

/// Outcome of one download attempt (one URL, possibly expanded to many files).
///
/// Constructors uphold two rules: a successful result always lists at least
/// one file, and a permanent failure is never a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    success: bool,
    files_downloaded: Vec<String>,
    media_id: Option<String>,
    error_message: Option<String>,
    metadata_file: Option<String>,
    row_context: RowContext,
    download_type: DownloadKind,
    permanent_failure: bool,
}

impl DownloadResult {
    /// A successful download.
    ///
    /// An empty `files` list is downgraded to a transient failure, since a
    /// download that produced nothing cannot be counted as done.
    pub fn succeeded(
        row_context: RowContext,
        download_type: DownloadKind,
        files: Vec<String>,
        media_id: Option<String>,
    ) -> Self {
        if files.is_empty() {
            return Self::failed(row_context, download_type, "download produced no files")
                .with_media_id(media_id);
        }
        Self {
            success: true,
            files_downloaded: files,
            media_id,
            error_message: None,
            metadata_file: None,
            row_context,
            download_type,
            permanent_failure: false,
        }
    }

    /// A failure worth retrying on a later run.
    pub fn failed(
        row_context: RowContext,
        download_type: DownloadKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            files_downloaded: Vec::new(),
            media_id: None,
            error_message: Some(error.into()),
            metadata_file: None,
            row_context,
            download_type,
            permanent_failure: false,
        }
    }

    /// A failure that must never be retried (content removed, private, ...).
    pub fn permanent(
        row_context: RowContext,
        download_type: DownloadKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            permanent_failure: true,
            ..Self::failed(row_context, download_type, error)
        }
    }

    #[must_use]
    pub fn with_media_id(mut self, media_id: Option<String>) -> Self {
        self.media_id = media_id;
        self
    }

    #[must_use]
    pub fn with_metadata_file(mut self, metadata_file: impl Into<String>) -> Self {
        self.metadata_file = Some(metadata_file.into());
        self
    }

    /// Keep whatever files a failed attempt left behind, for reconciliation.
    #[must_use]
    pub fn with_partial_files(mut self, files: Vec<String>) -> Self {
        if !self.success {
            self.files_downloaded = files;
        }
        self
    }

    pub const fn success(&self) -> bool {
        self.success
    }

    pub fn files_downloaded(&self) -> &[String] {
        &self.files_downloaded
    }

    pub fn media_id(&self) -> Option<&str> {
        self.media_id.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn metadata_file(&self) -> Option<&str> {
        self.metadata_file.as_deref()
    }

    pub const fn row_context(&self) -> &RowContext {
        &self.row_context
    }

    pub const fn download_type(&self) -> DownloadKind {
        self.download_type
    }

    pub const fn permanent_failure(&self) -> bool {
        self.permanent_failure
    }

    /// Values written into the row's tracking columns.
    pub fn summary(&self, attempted_at: DateTime<Utc>) -> ResultSummary {
        ResultSummary {
            status: if self.success {
                DownloadStatus::Completed
            } else {
                DownloadStatus::Failed
            },
            files: self.files_downloaded.join(","),
            media_id: self.media_id.clone().unwrap_or_default(),
            error: self.error_message.clone().unwrap_or_default(),
            last_attempt: attempted_at.to_rfc3339(),
        }
    }

    /// Default sidecar name: `{media_id}{_row{row_id}_{type}}_metadata.json`.
    pub fn default_metadata_filename(&self) -> String {
        let media: String = self
            .media_id
            .as_deref()
            .unwrap_or("unknown")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{media}{}_metadata.json", self.row_context.filename_suffix())
    }

    /// Full sidecar record for this result.
    pub fn to_sidecar(&self, timestamp: DateTime<Utc>) -> SidecarMetadata {
        SidecarMetadata {
            download_result: SidecarResult {
                success: self.success,
                files_downloaded: self.files_downloaded.clone(),
                media_id: self.media_id.clone(),
                error_message: self.error_message.clone(),
                download_type: self.download_type,
                permanent_failure: self.permanent_failure,
            },
            identity: self.row_context.to_metadata(timestamp),
        }
    }
}

/// Canonical per-attempt values written into the CSV row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSummary {
    pub status: DownloadStatus,
    pub files: String,
    pub media_id: String,
    pub error: String,
    pub last_attempt: String,
}

/// Row identity as stored in sidecar files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIdentity {
    pub source_csv_row_id: String,
    pub source_csv_index: usize,
    pub personality_type: String,
    pub person_name: String,
    pub person_email: String,
    pub download_timestamp: String,
    pub tracking_version: String,
}

/// Download fields stored in sidecar files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarResult {
    pub success: bool,
    pub files_downloaded: Vec<String>,
    pub media_id: Option<String>,
    pub error_message: Option<String>,
    pub download_type: DownloadKind,
    #[serde(default)]
    pub permanent_failure: bool,
}

/// On-disk sidecar JSON: the download fields plus the flattened row identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarMetadata {
    pub download_result: SidecarResult,
    #[serde(flatten)]
    pub identity: RowIdentity,
}

impl SidecarMetadata {
    pub fn row_context(&self) -> RowContext {
        RowContext::from_metadata(&self.identity)
    }
}
