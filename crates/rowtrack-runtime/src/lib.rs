//! Runtime services for rowtrack: resource monitoring and the dual-pool
//! task processor.

pub mod batch;
pub mod monitor;
pub mod processor;

pub use batch::{BatchSummary, process_batch_with_resource_management, run_batch};
pub use monitor::{MonitorError, ResourceLimits, ResourceMonitor, SysinfoProbe};
pub use processor::{
    CompletionReport, ConcurrentProcessor, FailedTask, ProcessorConfig, ProcessorError,
    ProcessorState, ProcessorStatus, TaskError, TaskHandle, TaskRecord,
};
