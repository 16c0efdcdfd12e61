//! Free-form metric parameter bag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A metric factory rejected its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MetricBuildError(pub String);

/// Parameters given to a metric factory, as written in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricParams(Map<String, Value>);

impl MetricParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a number, falling back to `default` when absent.
    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64, MetricBuildError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| MetricBuildError(format!("'{}' must be a number, got {}", key, value))),
        }
    }

    /// Reads a non-negative integer, falling back to `default` when absent.
    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, MetricBuildError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_u64()
                .map(|v| v as usize)
                .ok_or_else(|| {
                    MetricBuildError(format!(
                        "'{}' must be a non-negative integer, got {}",
                        key, value
                    ))
                }),
        }
    }

    /// Reads a mapping of names to numbers, empty when absent.
    pub fn f64_map(&self, key: &str) -> Result<BTreeMap<String, f64>, MetricBuildError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, value)| {
                    value.as_f64().map(|v| (name.clone(), v)).ok_or_else(|| {
                        MetricBuildError(format!("'{}.{}' must be a number", key, name))
                    })
                })
                .collect(),
            Some(other) => Err(MetricBuildError(format!(
                "'{}' must be a mapping, got {}",
                key, other
            ))),
        }
    }

    /// Rejects keys outside `allowed`.
    pub fn expect_keys(&self, allowed: &[&str]) -> Result<(), MetricBuildError> {
        let unknown: Vec<&str> = self
            .0
            .keys()
            .map(String::as_str)
            .filter(|k| !allowed.contains(k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(MetricBuildError(format!(
                "unknown parameter(s): {} (accepted: {})",
                unknown.join(", "),
                allowed.join(", ")
            )))
        }
    }
}
