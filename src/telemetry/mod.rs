//! Prometheus telemetry for calculation runs.
//!
//! # Example
//!
//! ```ignore
//! use landmark_qc::telemetry::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run a calculation ...
//! std::fs::write("metrics.prom", export_metrics())?;
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};
