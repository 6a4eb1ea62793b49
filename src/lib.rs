//! ZFS telemetry engine
//!
//! Collects pool, dataset, cache and device statistics from the kernel's
//! statistics pseudo-files and the pool tooling, and keeps them in bounded
//! in-memory histories that a viewer can read at any time.

/// Error types for collectors and configuration
pub mod error;

/// Configuration management
pub mod config;

/// Bounded histories shared between collectors and readers
pub mod history;

/// Records produced by the collectors
pub mod records;

/// Pool device tree and IO aggregation
pub mod topology;

/// Per-dataset read correlation
pub mod correlation;

/// Data collectors for pseudo-files and subprocess streams
pub mod collectors;

/// One-shot pool and dataset listings
pub mod inventory;

/// Collector orchestration and read-only accessors
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use error::{CollectorError, ConfigError};
pub use telemetry::{PoolTelemetry, Telemetry, TelemetrySnapshot};
