use rowtrack_csv::CsvError;
use rowtrack_runtime::ProcessorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("Could not add tracking columns to {0}")]
    Schema(String),

    #[error("Persistence worker failed: {0}")]
    Join(String),
}
