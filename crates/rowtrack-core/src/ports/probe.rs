//! Resource probe port.
//!
//! Separates reading OS counters from the monitor's bookkeeping so the
//! monitor can be driven by fixed readings in tests.

use thiserror::Error;

use crate::metrics::ProbeReading;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to read system counters: {0}")]
    Unavailable(String),
}

/// Port for sampling system load.
pub trait ResourceProbe: Send + Sync {
    fn sample(&self) -> Result<ProbeReading, ProbeError>;
}
