//! Retaining aggregator for order statistics.
//!
//! Unlike the default aggregator this keeps every per-sample value in memory
//! (and in checkpoints), so it is only used when a calculation asks for it
//! with `aggregator: quantiles`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::MetricResult;

use super::{AggregateError, Aggregator, AggregatorFactory, Summary};

/// Quantiles reported for each value key.
const QUANTILES: [(&str, f64); 3] = [("p05", 0.05), ("median", 0.5), ("p95", 0.95)];

/// Keeps all values per key and reports median, tails and mean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantileAggregator {
    count: u64,
    values: BTreeMap<String, Vec<f64>>,
}

impl QuantileAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Linear interpolation between closest ranks on sorted data.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

impl Aggregator for QuantileAggregator {
    fn update(&mut self, result: &MetricResult) {
        self.count += 1;
        for (key, value) in &result.values {
            self.values.entry(key.clone()).or_default().push(*value);
        }
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn finalize(&self) -> Summary {
        let mut statistics = BTreeMap::new();
        for (key, values) in &self.values {
            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);

            for (name, q) in QUANTILES {
                if let Some(v) = quantile(&sorted, q) {
                    statistics.insert(format!("{}.{}", key, name), v);
                }
            }
            if !sorted.is_empty() {
                let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
                statistics.insert(format!("{}.mean", key), mean);
            }
            statistics.insert(format!("{}.count", key), sorted.len() as f64);
        }
        Summary {
            count: self.count,
            statistics,
        }
    }

    fn snapshot(&self) -> Result<serde_json::Value, AggregateError> {
        serde_json::to_value(self).map_err(AggregateError::Snapshot)
    }
}

/// Factory for [`QuantileAggregator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantileAggregatorFactory;

impl AggregatorFactory for QuantileAggregatorFactory {
    fn name(&self) -> &str {
        "quantiles"
    }

    fn create(&self) -> Box<dyn Aggregator> {
        Box::new(QuantileAggregator::new())
    }

    fn restore(&self, state: serde_json::Value) -> Result<Box<dyn Aggregator>, AggregateError> {
        let restored: QuantileAggregator =
            serde_json::from_value(state).map_err(|source| AggregateError::Restore {
                aggregator: self.name().to_string(),
                source,
            })?;
        Ok(Box::new(restored))
    }
}
