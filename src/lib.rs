//! # rowtrack
//!
//! Row-centric download tracking with a CSV file as the system of record.
//!
//! This crate re-exports the workspace so downstream users can depend on a
//! single package:
//!
//! - [`domain`] (`rowtrack-core`): row contracts, statuses, settings, ports
//! - [`store`] (`rowtrack-csv`): the locked, atomic, backed-up `CsvManager`
//! - [`runtime`] (`rowtrack-runtime`): resource monitor and dual-pool processor
//! - [`download`] (`rowtrack-download`): yt-dlp, Google Drive, object storage, sidecars
//! - [`pipeline`] (`rowtrack-pipeline`): pending rows through the processor into the CSV
//!
//! The end-to-end tests in `tests/` exercise these crates together.

pub use rowtrack_core as domain;
pub use rowtrack_csv as store;
pub use rowtrack_download as download;
pub use rowtrack_pipeline as pipeline;
pub use rowtrack_runtime as runtime;

pub use rowtrack_core::{DownloadKind, DownloadResult, DownloadStatus, KindFilter, RowContext, Settings};
pub use rowtrack_csv::{CsvError, CsvManager, CsvManagerConfig};
pub use rowtrack_pipeline::{PipelineOptions, RowPipeline, RunSummary, pipeline_from_settings};
pub use rowtrack_runtime::{ConcurrentProcessor, ProcessorConfig, ResourceMonitor};
