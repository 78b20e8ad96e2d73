//! Common test utilities.
//!
//! CSV fixtures in a temp directory and resource probes with fixed readings.

pub mod fixtures;
pub mod probes;
