//! Resource probes with scripted readings.

#![allow(dead_code)]

use rowtrack::domain::{ProbeError, ProbeReading, ResourceProbe};

/// Always reports the same load.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl FixedProbe {
    pub const fn cpu(cpu_percent: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent: 20.0,
        }
    }

    pub const fn quiet() -> Self {
        Self::cpu(5.0)
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> Result<ProbeReading, ProbeError> {
        Ok(ProbeReading {
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
            active_threads: 1,
        })
    }
}
