//! Subcommands of the `rowtrack` binary.

use clap::{Args, Subcommand, ValueEnum};
use rowtrack_core::{DownloadKind, KindFilter};

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download pending rows and record the outcome in the CSV
    Download(DownloadArgs),

    /// Show per-kind status counts for the CSV
    Status {
        /// Print the counts as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add any missing tracking columns to the CSV
    EnsureColumns,

    /// Rewrite legacy `s3_paths`/`file_uuids` cells as JSON
    MigrateMappings,
}

/// Download source selector for `--type`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KindArg {
    Youtube,
    Drive,
    #[default]
    Both,
}

impl From<KindArg> for KindFilter {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Youtube => Self::Only(DownloadKind::Youtube),
            KindArg::Drive => Self::Only(DownloadKind::Drive),
            KindArg::Both => Self::Both,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DownloadArgs {
    /// Which downloads to run
    #[arg(long = "type", value_enum, default_value_t = KindArg::Both)]
    pub kind: KindArg,

    /// Only process the row with this id
    #[arg(long, value_name = "ID", conflicts_with = "all")]
    pub row_id: Option<String>,

    /// Process every pending row (the default)
    #[arg(long)]
    pub all: bool,

    /// Cap the number of videos fetched from a playlist
    #[arg(long, value_name = "N")]
    pub max_videos: Option<usize>,

    /// Cap the number of (row, kind) pairs taken this run
    #[arg(long, value_name = "N")]
    pub max_rows: Option<usize>,

    /// List the work without downloading or writing
    #[arg(long)]
    pub dry_run: bool,

    /// Retry rows whose previous attempt failed
    #[arg(long)]
    pub include_failed: bool,
}
