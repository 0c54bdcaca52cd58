//! Common types and infrastructure for the fedcoord coordinator.
//!
//! This crate holds everything shared between the orchestration engine and
//! the coordinator binary: model version and weight-delta types, the error
//! taxonomy presented to clients, configuration loading, and logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::CoordinatorConfig;
pub use error::CoordError;
pub use types::{ModelVersion, WeightDelta};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn unix_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
