//! Resource telemetry samples.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Load classification of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Normal,
    Warning,
    Critical,
}

impl ResourceStatus {
    /// Classify the worse of two percentages against warning/critical thresholds.
    pub fn classify(cpu_percent: f64, memory_percent: f64, warning: f64, critical: f64) -> Self {
        let peak = cpu_percent.max(memory_percent);
        if peak >= critical {
            Self::Critical
        } else if peak >= warning {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point-in-time sample. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_threads: usize,
    pub queue_size: usize,
    pub timestamp: DateTime<Utc>,
    pub status: ResourceStatus,
}

/// Raw reading from a probe, before classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReading {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub active_threads: usize,
}
