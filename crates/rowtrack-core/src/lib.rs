//! Core domain types and ports for rowtrack.
//!
//! Everything here is free of CSV, network and OS-specific code. Adapter
//! crates (`rowtrack-csv`, `rowtrack-runtime`, `rowtrack-download`) build on
//! these types.

pub mod events;
pub mod metrics;
pub mod ports;
pub mod ratelimit;
pub mod retry;
pub mod row;
pub mod sanitize;
pub mod settings;
pub mod status;

// Re-export commonly used types for convenience
pub use events::{ProcessorEvent, TaskKind, TaskPriority};
pub use metrics::{ProbeReading, ResourceMetrics, ResourceStatus};
pub use ports::{
    ChannelProgressSink, MediaDownloader, NoopProgressSink, ObjectStore, ProbeError,
    ProgressSink, ResourceProbe, StorageError, UploadOutcome,
};
pub use ratelimit::{RateLimitError, RateLimiter};
pub use retry::{BackoffPolicy, BackoffStrategy};
pub use row::{
    DownloadResult, ResultSummary, RowContext, RowIdentity, SidecarMetadata, SidecarResult,
    TRACKING_VERSION,
};
pub use sanitize::{
    DEFAULT_MAX_FIELD_LENGTH, is_csv_field_safe, sanitize_csv_field, sanitize_error_message,
};
pub use settings::{
    CsvSettings, DownloadSettings, MassDownloadSettings, PathSettings, RateLimitSettings,
    ResourceLimitSettings, RetrySettings, ServiceRateLimit, Settings, SettingsError,
    validate_settings,
};
pub use status::{DownloadKind, DownloadStatus, KindFilter, UnknownKind};
