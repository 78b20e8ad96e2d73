//! Download kinds and the per-kind status vocabulary stored in the CSV.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Source of a download. Each kind owns its own set of tracking columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Youtube,
    Drive,
}

impl DownloadKind {
    pub const ALL: [Self; 2] = [Self::Youtube, Self::Drive];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Drive => "drive",
        }
    }

    /// Column holding the kind's status (`youtube_status`, `drive_status`).
    pub const fn status_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_status",
            Self::Drive => "drive_status",
        }
    }

    pub const fn files_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_files",
            Self::Drive => "drive_files",
        }
    }

    pub const fn media_id_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_media_id",
            Self::Drive => "drive_media_id",
        }
    }

    /// Column counting attempts made for this kind.
    pub const fn attempts_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_attempts",
            Self::Drive => "drive_attempts",
        }
    }

    /// Column holding the source link for this kind.
    pub const fn link_column(self) -> &'static str {
        match self {
            Self::Youtube => "youtube_playlist",
            Self::Drive => "google_drive",
        }
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a kind string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown download type '{0}' (expected youtube, drive or both)")]
pub struct UnknownKind(pub String);

impl FromStr for DownloadKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(Self::Youtube),
            "drive" | "google_drive" => Ok(Self::Drive),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// Which kinds a pending-work query should consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    Only(DownloadKind),
    #[default]
    Both,
}

impl KindFilter {
    pub const fn kinds(self) -> &'static [DownloadKind] {
        match self {
            Self::Only(DownloadKind::Youtube) => &[DownloadKind::Youtube],
            Self::Only(DownloadKind::Drive) => &[DownloadKind::Drive],
            Self::Both => &DownloadKind::ALL,
        }
    }
}

impl From<DownloadKind> for KindFilter {
    fn from(kind: DownloadKind) -> Self {
        Self::Only(kind)
    }
}

impl FromStr for KindFilter {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("both") {
            return Ok(Self::Both);
        }
        s.parse::<DownloadKind>().map(Self::Only)
    }
}

/// Value of a `{kind}_status` cell.
///
/// Cells are free text on disk, so anything unrecognised is kept verbatim
/// as [`DownloadStatus::Unknown`] and never treated as pending work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DownloadStatus {
    #[default]
    Empty,
    Pending,
    Completed,
    Failed,
    Streamed,
    Unknown(String),
}

impl DownloadStatus {
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        match value.to_ascii_lowercase().as_str() {
            "" | "nan" => Self::Empty,
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "streamed" => Self::Streamed,
            _ => Self::Unknown(value.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Streamed => "streamed",
            Self::Unknown(s) => s,
        }
    }

    /// Whether the row still needs a first attempt.
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Empty | Self::Pending)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("YouTube".parse::<DownloadKind>(), Ok(DownloadKind::Youtube));
        assert_eq!("drive".parse::<DownloadKind>(), Ok(DownloadKind::Drive));
        assert!("vimeo".parse::<DownloadKind>().is_err());
    }

    #[test]
    fn test_kind_filter_both() {
        let filter: KindFilter = "both".parse().unwrap();
        assert_eq!(filter.kinds(), &DownloadKind::ALL);
        let filter: KindFilter = "drive".parse().unwrap();
        assert_eq!(filter.kinds(), &[DownloadKind::Drive]);
    }

    #[test]
    fn test_status_parse_preserves_unknown() {
        assert_eq!(DownloadStatus::parse(" Completed "), DownloadStatus::Completed);
        assert_eq!(DownloadStatus::parse("nan"), DownloadStatus::Empty);
        let odd = DownloadStatus::parse("queued");
        assert_eq!(odd.as_str(), "queued");
        assert!(!odd.is_pending());
    }
}
