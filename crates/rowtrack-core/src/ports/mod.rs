//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the pipeline expects from collaborators.
//! They use only domain types; implementations live in adapter crates.

pub mod downloader;
pub mod probe;
pub mod progress;
pub mod storage;

pub use downloader::MediaDownloader;
pub use probe::{ProbeError, ResourceProbe};
pub use progress::{ChannelProgressSink, NoopProgressSink, ProgressSink};
pub use storage::{ObjectStore, StorageError, UploadOutcome};
