//! landmark-qc: quality metrics for landmark keypoint datasets.
//!
//! Pose and hand trackers emit per-frame landmark arrays. This library
//! evaluates configured metrics over every sample of such a dataset, groups
//! the arrays into (possibly nested) categories, and aggregates the results
//! into per-category statistics. Runs are parallel, checkpointed and
//! resumable, and their results do not depend on the worker count.
//!
//! ```ignore
//! use std::sync::Arc;
//! use landmark_qc::{Calculator, ExecutionOptions, JsonDirDataset, Manifest, MetricRegistry, RunOptions};
//!
//! let manifest = Manifest::from_path("qc.yaml")?;
//! let calculator = Calculator::from_manifest(&manifest, &MetricRegistry::builtin(), ExecutionOptions::from_env()?)?;
//! let report = calculator
//!     .run(Arc::new(JsonDirDataset::open("./samples")?), RunOptions::new())
//!     .await?;
//! println!("{}", report.summary());
//! ```

// Core modules
pub mod aggregate;
pub mod calculator;
pub mod categories;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metric;
pub mod registry;
pub mod report;
pub mod telemetry;

pub use aggregate::{AggregationStrategy, Aggregator, AggregatorFactory, AggregatorKind, Summary};
pub use calculator::{Calculator, CalculatorError, Checkpoint, RunOptions, ShutdownSignal};
pub use categories::{CategoryDefinitions, CategorySpec, ResolvedCategory};
pub use config::{CalculationSpec, ExecutionOptions, Manifest};
pub use dataset::{Dataset, InMemoryDataset, JsonDirDataset};
pub use error::{CategoryError, ConfigError, DatasetError, FaultKind, PluginValidationError, UnitFault};
pub use metric::{CategoryContext, Metric, MetricFault, MetricParams, MetricResult};
pub use registry::{MetricRegistration, MetricRegistry};
pub use report::{Report, RunMetadata};
