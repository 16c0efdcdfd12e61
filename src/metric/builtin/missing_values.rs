//! Pooled count of missing scalar entries.

use std::sync::Arc;

use ndarray::ArrayD;

use crate::aggregate::{AggregationStrategy, RatioAggregatorFactory};
use crate::metric::{
    CategoryContext, Metric, MetricBuildError, MetricFault, MetricParams, MetricResult,
};

/// Counts missing and total entries per sample.
///
/// Aggregates as a pooled ratio (sum of missing over sum of total) so that
/// long recordings weigh more than short ones, unlike a mean of per-sample
/// rates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissingValues;

impl MissingValues {
    pub const ID: &'static str = "missing-values";
    pub const DESCRIPTION: &'static str =
        "Share of missing scalar entries, pooled across all samples";

    pub fn from_params(params: &MetricParams) -> Result<Self, MetricBuildError> {
        params.expect_keys(&[])?;
        Ok(Self)
    }
}

impl Metric for MissingValues {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn calculate(
        &self,
        _category: &CategoryContext,
        array: &ArrayD<f64>,
    ) -> Result<MetricResult, MetricFault> {
        if array.is_empty() {
            return Err(MetricFault::PreconditionViolation(
                "array has no values".to_string(),
            ));
        }
        let missing = array.iter().filter(|v| v.is_nan()).count();

        Ok(MetricResult::new(Self::ID)
            .with_value("missing_values", missing as f64)
            .with_value("total_values", array.len() as f64))
    }

    fn aggregation(&self) -> AggregationStrategy {
        AggregationStrategy::Custom(Arc::new(RatioAggregatorFactory::new(
            "missing_values",
            "total_values",
            "missing_fraction",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_counts_missing_entries() {
        let mut array = ArrayD::<f64>::zeros(IxDyn(&[4, 2, 3]));
        array[[0, 0, 0]] = f64::NAN;
        array[[3, 1, 2]] = f64::NAN;
        let ctx = CategoryContext::new("pose", vec![], vec![]);
        let result = MissingValues.calculate(&ctx, &array).expect("calculate");
        assert_eq!(result.value("missing_values"), Some(2.0));
        assert_eq!(result.value("total_values"), Some(24.0));
    }

    #[test]
    fn test_declares_ratio_aggregation() {
        assert!(matches!(
            MissingValues.aggregation(),
            AggregationStrategy::Custom(_)
        ));
        assert!(MissingValues::from_params(&MetricParams::new().with("x", 1)).is_err());
    }
}
