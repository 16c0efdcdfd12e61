//! Streaming aggregation of metric results.
//!
//! Each `(calculation, category)` bucket owns one [`Aggregator`]. The
//! coordinator feeds it results in ascending sample order and calls
//! [`Aggregator::finalize`] once at the end of the run. Aggregators can
//! snapshot their state as JSON so that runs can be checkpointed and resumed.
//!
//! Strategies:
//!
//! - [`PerKeyWelford`] (default): constant memory mean/variance/min/max per value key
//! - [`QuantileAggregator`]: retains values to report median and tails; opt-in only
//! - custom factories declared by a metric, such as [`RatioAggregator`]

mod quantile;
mod ratio;
mod welford;

pub use quantile::{QuantileAggregator, QuantileAggregatorFactory};
pub use ratio::{RatioAggregator, RatioAggregatorFactory};
pub use welford::{PerKeyWelford, PerKeyWelfordFactory, WelfordState};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metric::MetricResult;

/// Errors raised when snapshotting or restoring aggregation state.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Failed to serialize aggregation state: {0}")]
    Snapshot(#[source] serde_json::Error),

    #[error("Failed to restore '{aggregator}' state: {source}")]
    Restore {
        aggregator: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Finalized statistics of one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of results folded into the bucket.
    pub count: u64,
    /// Named statistics, e.g. `missing_rate.mean`.
    pub statistics: BTreeMap<String, f64>,
}

impl Summary {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.statistics.get(name).copied()
    }
}

/// A streaming fold over metric results.
///
/// State is exclusively owned by one bucket and only touched by the
/// coordinator, so implementations need no interior synchronization.
pub trait Aggregator: Send {
    /// Folds one result into the state.
    fn update(&mut self, result: &MetricResult);

    /// Number of results folded so far.
    fn count(&self) -> u64;

    /// Computes the summary without consuming the state.
    fn finalize(&self) -> Summary;

    /// Serializes the state for a checkpoint.
    fn snapshot(&self) -> Result<serde_json::Value, AggregateError>;
}

/// Creates fresh or restored aggregators of one kind.
pub trait AggregatorFactory: Send + Sync {
    /// Short label recorded in reports.
    fn name(&self) -> &str;

    /// Creates an empty aggregator.
    fn create(&self) -> Box<dyn Aggregator>;

    /// Restores an aggregator from a [`Aggregator::snapshot`] value.
    fn restore(&self, state: serde_json::Value) -> Result<Box<dyn Aggregator>, AggregateError>;
}

/// Aggregator selection a calculation may force in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorKind {
    Welford,
    Quantiles,
}

/// How the results of one calculation are aggregated.
///
/// Decided once per calculation at construction time.
#[derive(Clone)]
pub enum AggregationStrategy {
    PerKeyWelford,
    Quantiles,
    Custom(Arc<dyn AggregatorFactory>),
}

impl AggregationStrategy {
    /// Picks the strategy: an explicit manifest choice wins over the metric's own.
    pub fn select(declared: AggregationStrategy, configured: Option<AggregatorKind>) -> Self {
        match configured {
            Some(AggregatorKind::Welford) => AggregationStrategy::PerKeyWelford,
            Some(AggregatorKind::Quantiles) => AggregationStrategy::Quantiles,
            None => declared,
        }
    }

    /// Factory for this strategy.
    pub fn factory(&self) -> Arc<dyn AggregatorFactory> {
        match self {
            AggregationStrategy::PerKeyWelford => Arc::new(PerKeyWelfordFactory),
            AggregationStrategy::Quantiles => Arc::new(QuantileAggregatorFactory),
            AggregationStrategy::Custom(factory) => Arc::clone(factory),
        }
    }
}

impl fmt::Debug for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStrategy::PerKeyWelford => f.write_str("PerKeyWelford"),
            AggregationStrategy::Quantiles => f.write_str("Quantiles"),
            AggregationStrategy::Custom(factory) => write!(f, "Custom({})", factory.name()),
        }
    }
}
