//! CLI bootstrap: settings resolution and logging.
//!
//! Handlers receive a [`CliContext`] holding the fully resolved settings and
//! build whatever they need from it.

use rowtrack_core::{Settings, validate_settings};
use rowtrack_csv::CsvManager;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;
use crate::parser::Cli;

/// Resolved configuration shared by every command.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub settings: Settings,
}

impl CliContext {
    /// Resolve settings from `--config`, the environment and `--csv`.
    ///
    /// Precedence, lowest first: built-in defaults, the settings file,
    /// `.env`/process environment, then command-line flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let settings = match &cli.config {
            Some(path) => Settings::load(path)?,
            None => Settings::with_defaults(),
        };
        let mut settings = settings.with_env_overrides();
        if let Some(csv) = &cli.csv {
            settings.paths.output_csv.clone_from(csv);
        }
        validate_settings(&settings)?;
        debug!(csv = %settings.paths.output_csv.display(), "Settings resolved");
        Ok(Self { settings })
    }

    pub fn csv_manager(&self) -> CsvManager {
        CsvManager::from_settings(&self.settings)
    }
}

/// Install the global tracing subscriber.
///
/// `--verbose` forces `debug`; otherwise `RUST_LOG` applies, falling back to
/// `info`. Logs go to stderr so command output on stdout stays clean.
pub fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .ok();
}
