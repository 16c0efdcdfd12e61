//! Per-unit metric results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of one metric for one `(sample, category)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Identifier of the metric that produced this result.
    pub metric: String,
    /// Named scalar values; the default aggregator folds every key.
    pub values: BTreeMap<String, f64>,
    /// Free-form metadata. Not aggregated by the default aggregator.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl MetricResult {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            values: BTreeMap::new(),
            metadata: Map::new(),
        }
    }

    /// Adds a named scalar value.
    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// First value key that is NaN or infinite, if any.
    pub fn first_non_finite(&self) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(k, _)| k.as_str())
    }
}
