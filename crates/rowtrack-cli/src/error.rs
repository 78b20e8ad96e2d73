//! CLI error type and exit-code mapping.

use rowtrack_core::SettingsError;
use rowtrack_csv::CsvError;
use rowtrack_pipeline::PipelineError;
use thiserror::Error;

/// Exit code reported after Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum CliError {
    /// Anything the run could not recover from.
    #[error("{0}")]
    Failed(String),

    #[error("Invalid arguments: {0}")]
    Arguments(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Interrupted")]
    Interrupted,
}

impl CliError {
    /// Process exit code for this error.
    ///
    /// - 1: unrecoverable failure (configuration and CSV errors included)
    /// - 2: invalid arguments
    /// - 130: interrupted by Ctrl-C
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Failed(_) | Self::Config(_) => 1,
            Self::Arguments(_) => 2,
            Self::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// Exit code for any error a handler returned.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>().map_or(1, CliError::exit_code)
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<CsvError> for CliError {
    fn from(err: CsvError) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<PipelineError> for CliError {
    fn from(err: PipelineError) -> Self {
        Self::Failed(err.to_string())
    }
}
