//! Fraction of frames with missing landmarks.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::metric::{
    require_frames, CategoryContext, Metric, MetricBuildError, MetricFault, MetricParams,
    MetricResult,
};

/// Counts frames whose share of missing entries exceeds a threshold.
///
/// With the default threshold of `0.0` a single `NaN` marks the frame as
/// missing. `category_thresholds` overrides the threshold per category name,
/// e.g. to tolerate partially occluded hands but not a partially missing pose.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingRate {
    threshold: f64,
    category_thresholds: BTreeMap<String, f64>,
    min_frames: usize,
}

impl MissingRate {
    pub const ID: &'static str = "missing-rate";
    pub const DESCRIPTION: &'static str =
        "Fraction of frames whose share of missing values exceeds a threshold";

    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            category_thresholds: BTreeMap::new(),
            min_frames: 1,
        }
    }

    /// Builds the metric from `threshold`, `category_thresholds` and `min_frames`.
    pub fn from_params(params: &MetricParams) -> Result<Self, MetricBuildError> {
        params.expect_keys(&["threshold", "category_thresholds", "min_frames"])?;

        let threshold = params.f64_or("threshold", 0.0)?;
        let category_thresholds = params.f64_map("category_thresholds")?;
        for (name, value) in std::iter::once(("threshold", &threshold))
            .chain(category_thresholds.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if !(0.0..=1.0).contains(value) {
                return Err(MetricBuildError(format!(
                    "threshold for '{}' must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(Self {
            threshold,
            category_thresholds,
            min_frames: params.usize_or("min_frames", 1)?.max(1),
        })
    }

    fn threshold_for(&self, category: &str) -> f64 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.threshold)
    }
}

impl Metric for MissingRate {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        Self::DESCRIPTION
    }

    fn calculate(
        &self,
        category: &CategoryContext,
        array: &ArrayD<f64>,
    ) -> Result<MetricResult, MetricFault> {
        let frames = require_frames(array, self.min_frames)?;
        let per_frame = array.len() / frames;
        if per_frame == 0 {
            return Err(MetricFault::PreconditionViolation(
                "frames contain no values".to_string(),
            ));
        }

        let threshold = self.threshold_for(&category.name);
        let mut missing_in_frame = vec![0usize; frames];
        // Logical (row-major) order, so position / per_frame is the frame index.
        for (position, value) in array.iter().enumerate() {
            if value.is_nan() {
                missing_in_frame[position / per_frame] += 1;
            }
        }

        let missing_frames = missing_in_frame
            .iter()
            .filter(|&&count| count as f64 / per_frame as f64 > threshold)
            .count();

        Ok(MetricResult::new(Self::ID)
            .with_value("missing_rate", missing_frames as f64 / frames as f64)
            .with_metadata("missing_frames", missing_frames)
            .with_metadata("total_frames", frames)
            .with_metadata("threshold", threshold))
    }
}
