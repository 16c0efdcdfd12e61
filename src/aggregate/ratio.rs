//! Pooled ratio aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::MetricResult;

use super::{AggregateError, Aggregator, AggregatorFactory, Summary};

/// Sums a numerator and a denominator key across results and reports their ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioAggregator {
    numerator: String,
    denominator: String,
    output: String,
    count: u64,
    numerator_sum: f64,
    denominator_sum: f64,
}

impl RatioAggregator {
    pub fn new(
        numerator: impl Into<String>,
        denominator: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            numerator: numerator.into(),
            denominator: denominator.into(),
            output: output.into(),
            count: 0,
            numerator_sum: 0.0,
            denominator_sum: 0.0,
        }
    }
}

impl Aggregator for RatioAggregator {
    fn update(&mut self, result: &MetricResult) {
        self.count += 1;
        self.numerator_sum += result.value(&self.numerator).unwrap_or(0.0);
        self.denominator_sum += result.value(&self.denominator).unwrap_or(0.0);
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn finalize(&self) -> Summary {
        let mut statistics = BTreeMap::new();
        statistics.insert(format!("{}.sum", self.numerator), self.numerator_sum);
        statistics.insert(format!("{}.sum", self.denominator), self.denominator_sum);
        if self.denominator_sum != 0.0 {
            statistics.insert(
                self.output.clone(),
                self.numerator_sum / self.denominator_sum,
            );
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

/// Factory for [`RatioAggregator`] with fixed key names.
#[derive(Debug, Clone)]
pub struct RatioAggregatorFactory {
    numerator: String,
    denominator: String,
    output: String,
}

impl RatioAggregatorFactory {
    pub fn new(
        numerator: impl Into<String>,
        denominator: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            numerator: numerator.into(),
            denominator: denominator.into(),
            output: output.into(),
        }
    }
}

impl AggregatorFactory for RatioAggregatorFactory {
    fn name(&self) -> &str {
        "ratio"
    }

    fn create(&self) -> Box<dyn Aggregator> {
        Box::new(RatioAggregator::new(
            self.numerator.clone(),
            self.denominator.clone(),
            self.output.clone(),
        ))
    }

    fn restore(&self, state: serde_json::Value) -> Result<Box<dyn Aggregator>, AggregateError> {
        let restored: RatioAggregator =
            serde_json::from_value(state).map_err(|source| AggregateError::Restore {
                aggregator: self.name().to_string(),
                source,
            })?;
        Ok(Box::new(restored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(missing: f64, total: f64) -> MetricResult {
        MetricResult::new("missing-values")
            .with_value("missing_values", missing)
            .with_value("total_values", total)
    }

    #[test]
    fn test_pooled_ratio_weighs_by_denominator() {
        let factory = RatioAggregatorFactory::new("missing_values", "total_values", "missing_fraction");
        let mut agg = factory.create();
        agg.update(&counts(1.0, 10.0));
        agg.update(&counts(0.0, 90.0));

        let summary = agg.finalize();
        assert_eq!(summary.count, 2);
        // A mean of per-sample ratios would give 0.05.
        assert_eq!(summary.get("missing_fraction"), Some(0.01));
        assert_eq!(summary.get("total_values.sum"), Some(100.0));
    }

    #[test]
    fn test_zero_denominator_omits_ratio() {
        let agg = RatioAggregator::new("a", "b", "ratio");
        assert_eq!(agg.finalize().get("ratio"), None);
    }

    #[test]
    fn test_restore_round_trip() {
        let factory = RatioAggregatorFactory::new("missing_values", "total_values", "missing_fraction");
        let mut agg = factory.create();
        agg.update(&counts(3.0, 12.0));
        let restored = factory
            .restore(agg.snapshot().expect("snapshot"))
            .expect("restore");
        assert_eq!(restored.finalize(), agg.finalize());
        assert!(factory.restore(serde_json::json!({"bogus": true})).is_err());
    }
}
