//! Processor events - discriminated union for every task lifecycle change.

use serde::{Deserialize, Serialize};

use crate::metrics::ResourceStatus;

/// Which pool a task was submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// General work bounded by the adaptive channel budget.
    Channel,
    /// Downloads bounded by the fixed download semaphore.
    Download,
}

impl TaskKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Download => "download",
        }
    }
}

/// Priority tag recorded with each submission.
///
/// Recorded for inspection only; it does not reorder execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Events emitted by the concurrent processor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorEvent {
    TaskSubmitted {
        task_id: String,
        kind: TaskKind,
        priority: TaskPriority,
    },
    TaskStarted {
        task_id: String,
        kind: TaskKind,
    },
    TaskCompleted {
        task_id: String,
        /// Wall time from start to finish in milliseconds.
        elapsed_ms: u64,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    DownloadCompleted {
        task_id: String,
        elapsed_ms: u64,
    },
    DownloadFailed {
        task_id: String,
        error: String,
    },
    /// The channel budget changed size.
    PoolResized {
        from: usize,
        to: usize,
    },
    /// A monitor sample crossed the warning threshold.
    ResourceWarning {
        status: ResourceStatus,
        cpu_percent: f64,
        memory_percent: f64,
    },
}

impl ProcessorEvent {
    pub fn submitted(task_id: impl Into<String>, kind: TaskKind, priority: TaskPriority) -> Self {
        Self::TaskSubmitted {
            task_id: task_id.into(),
            kind,
            priority,
        }
    }

    pub fn started(task_id: impl Into<String>, kind: TaskKind) -> Self {
        Self::TaskStarted {
            task_id: task_id.into(),
            kind,
        }
    }

    /// Completion event for the given pool.
    pub fn completed(task_id: impl Into<String>, kind: TaskKind, elapsed_ms: u64) -> Self {
        let task_id = task_id.into();
        match kind {
            TaskKind::Channel => Self::TaskCompleted { task_id, elapsed_ms },
            TaskKind::Download => Self::DownloadCompleted { task_id, elapsed_ms },
        }
    }

    /// Failure event for the given pool.
    pub fn failed(task_id: impl Into<String>, kind: TaskKind, error: impl Into<String>) -> Self {
        let task_id = task_id.into();
        let error = error.into();
        match kind {
            TaskKind::Channel => Self::TaskFailed { task_id, error },
            TaskKind::Download => Self::DownloadFailed { task_id, error },
        }
    }

    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::PoolResized { .. } | Self::ResourceWarning { .. } => None,
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::DownloadCompleted { task_id, .. }
            | Self::DownloadFailed { task_id, .. } => Some(task_id),
        }
    }

    /// Event name for progress callbacks and logs.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::DownloadFailed { .. } => "download_failed",
            Self::PoolResized { .. } => "pool_resized",
            Self::ResourceWarning { .. } => "resource_warning",
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::TaskFailed { .. } | Self::DownloadFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_is_routed_by_kind() {
        let e = ProcessorEvent::completed("t1", TaskKind::Download, 5);
        assert_eq!(e.event_name(), "download_completed");
        let e = ProcessorEvent::completed("t1", TaskKind::Channel, 5);
        assert_eq!(e.event_name(), "task_completed");
        assert_eq!(e.task_id(), Some("t1"));
    }

    #[test]
    fn test_serialized_tag_matches_event_name() {
        let e = ProcessorEvent::failed("t2", TaskKind::Channel, "boom");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], e.event_name());
        assert!(e.is_failure());

        let resized = ProcessorEvent::PoolResized { from: 4, to: 2 };
        assert_eq!(serde_json::to_value(&resized).unwrap()["type"], "pool_resized");
        assert_eq!(resized.task_id(), None);
    }
}
