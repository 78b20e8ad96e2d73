//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Row-centric download tracker.
///
/// Reads download links from a CSV, fetches them, and records every outcome
/// back into the same CSV.
#[derive(Parser, Debug)]
#[command(name = "rowtrack")]
#[command(about = "Download and track media links listed in a CSV")]
#[command(version)]
pub struct Cli {
    /// Settings file (TOML); defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH", env = "ROWTRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// CSV file to operate on, overriding the configured path
    #[arg(long, global = true, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}
