//! Error types for landmark-qc operations.
//!
//! Errors are split along the propagation policy of the engine:
//! - `ConfigError` is fatal and always raised before any sample is touched
//! - `PluginValidationError` only excludes a metric registration from the registry
//! - `DatasetError` comes from the dataset boundary and is turned into a per-unit fault
//! - `UnitFault` is a recorded, non-fatal failure of one `(sample, category, spec)` unit

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal configuration errors.
///
/// Any of these aborts calculator construction before the dataset is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown metric '{id}' (registered: {available})")]
    UnknownMetric { id: String, available: String },

    #[error("Invalid parameters for metric '{metric}': {reason}")]
    InvalidParameters { metric: String, reason: String },

    #[error("Metric factory for '{expected}' produced a metric reporting id '{actual}'")]
    MetricIdMismatch { expected: String, actual: String },

    #[error("Category error: {0}")]
    Category(#[from] CategoryError),

    #[error("Malformed manifest: {0}")]
    Manifest(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidOption { key: String, message: String },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while expanding category definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("Circular category reference: {}", chain.join(" -> "))]
    CircularReference { chain: Vec<String> },
}

/// A metric registration failed its capability check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginValidationError {
    #[error("Invalid metric identifier '{0}': must match [a-z][a-z0-9_-]*")]
    InvalidIdentifier(String),

    #[error("Metric '{0}' has an empty description")]
    MissingDescription(String),

    #[error("Metric '{0}' is already registered")]
    Duplicate(String),
}

/// Errors surfaced by a dataset implementation.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Sample {index} out of range (dataset has {len} samples)")]
    SampleOutOfRange { index: usize, len: usize },

    #[error("Array '{name}' not found in sample {index}")]
    ArrayNotFound { index: usize, name: String },

    #[error("Invalid array '{name}': {reason}")]
    InvalidArray { name: String, reason: String },

    #[error("Failed to open dataset: {0}")]
    Open(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind tag of a recorded per-unit fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    DataUnavailable,
    PreconditionViolation,
    Numeric,
    Storage,
    WorkerPanic,
}

impl FaultKind {
    /// Stable label used in logs and telemetry.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::DataUnavailable => "data_unavailable",
            FaultKind::PreconditionViolation => "precondition_violation",
            FaultKind::Numeric => "numeric",
            FaultKind::Storage => "storage",
            FaultKind::WorkerPanic => "worker_panic",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal failure of a single evaluation unit.
///
/// The unit is skipped; the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitFault {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Numeric error: {0}")]
    Numeric(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Worker panicked: {0}")]
    WorkerPanic(String),
}

impl UnitFault {
    /// Returns the kind tag of this fault.
    pub fn kind(&self) -> FaultKind {
        match self {
            UnitFault::DataUnavailable(_) => FaultKind::DataUnavailable,
            UnitFault::PreconditionViolation(_) => FaultKind::PreconditionViolation,
            UnitFault::Numeric(_) => FaultKind::Numeric,
            UnitFault::Storage(_) => FaultKind::Storage,
            UnitFault::WorkerPanic(_) => FaultKind::WorkerPanic,
        }
    }

    /// Returns the fault message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            UnitFault::DataUnavailable(m)
            | UnitFault::PreconditionViolation(m)
            | UnitFault::Numeric(m)
            | UnitFault::Storage(m)
            | UnitFault::WorkerPanic(m) => m,
        }
    }
}

impl From<DatasetError> for UnitFault {
    fn from(err: DatasetError) -> Self {
        match err {
            DatasetError::ArrayNotFound { .. } | DatasetError::SampleOutOfRange { .. } => {
                UnitFault::DataUnavailable(err.to_string())
            }
            other => UnitFault::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_reference_message() {
        let err = CategoryError::CircularReference {
            chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "Circular category reference: a -> b -> a");
    }

    #[test]
    fn test_dataset_error_maps_to_fault_kind() {
        let missing: UnitFault = DatasetError::ArrayNotFound {
            index: 3,
            name: "engineA.pose".to_string(),
        }
        .into();
        assert_eq!(missing.kind(), FaultKind::DataUnavailable);

        let io: UnitFault =
            DatasetError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert_eq!(io.kind(), FaultKind::Storage);
        assert!(io.message().contains("disk"));
    }

    #[test]
    fn test_fault_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FaultKind::PreconditionViolation).expect("serialize");
        assert_eq!(json, "\"precondition_violation\"");
    }
}
