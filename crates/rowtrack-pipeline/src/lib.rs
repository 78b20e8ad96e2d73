//! Row pipeline: reads pending rows from the CSV, downloads them under the
//! concurrent processor, and records every outcome back into the row.

mod compose;
mod error;
mod job;
mod pipeline;

pub use compose::pipeline_from_settings;
pub use error::PipelineError;
pub use job::JobOutcome;
pub use pipeline::{PipelineOptions, PlannedDownload, RowPipeline, RunSummary};
