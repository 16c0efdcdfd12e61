//! Temporal jitter of landmark trajectories.

use ndarray::ArrayD;

use crate::metric::{
    require_frames, CategoryContext, Metric, MetricBuildError, MetricFault, MetricParams,
    MetricResult,
};

/// Magnitude of the second temporal difference of each point.
///
/// For a point trajectory `x(t)` the acceleration `x(t+1) - 2x(t) + x(t-1)`
/// is taken over all coordinate dimensions; its Euclidean norm is averaged
/// over every point and every frame triple that has no missing values.
/// Smooth, plausible tracks score low; flickering detections score high.
#[derive(Debug, Clone, PartialEq)]
pub struct Jitter {
    min_frames: usize,
}

impl Jitter {
    pub const ID: &'static str = "jitter";
    pub const DESCRIPTION: &'static str =
        "Mean and max magnitude of frame-to-frame landmark acceleration";

    pub fn new() -> Self {
        Self { min_frames: 3 }
    }

    pub fn from_params(params: &MetricParams) -> Result<Self, MetricBuildError> {
        params.expect_keys(&["min_frames"])?;
        let min_frames = params.usize_or("min_frames", 3)?;
        if min_frames < 3 {
            return Err(MetricBuildError(format!(
                "min_frames must be at least 3, got {}",
                min_frames
            )));
        }
        Ok(Self { min_frames })
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for Jitter {
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
        if array.ndim() < 2 {
            return Err(MetricFault::PreconditionViolation(format!(
                "expected (frames, points, ...) array, got {} dimension(s)",
                array.ndim()
            )));
        }
        let frames = require_frames(array, self.min_frames)?;
        let points = array.shape()[1];
        let dims: usize = array.shape()[2..].iter().product();
        if points == 0 || dims == 0 {
            return Err(MetricFault::PreconditionViolation(
                "array has no landmark coordinates".to_string(),
            ));
        }

        // Logical order flattening: value (t, p, d) sits at (t * points + p) * dims + d.
        let flat: Vec<f64> = array.iter().copied().collect();
        let at = |t: usize, p: usize, d: usize| flat[(t * points + p) * dims + d];

        let mut sum = 0.0;
        let mut max = 0.0_f64;
        let mut count = 0usize;

        for p in 0..points {
            for t in 1..frames - 1 {
                let mut squared = 0.0;
                let mut complete = true;
                for d in 0..dims {
                    let accel = at(t + 1, p, d) - 2.0 * at(t, p, d) + at(t - 1, p, d);
                    if accel.is_nan() {
                        complete = false;
                        break;
                    }
                    squared += accel * accel;
                }
                if complete {
                    let magnitude = squared.sqrt();
                    sum += magnitude;
                    max = max.max(magnitude);
                    count += 1;
                }
            }
        }

        if count == 0 {
            return Err(MetricFault::Numeric(
                "no complete frame triple to measure jitter (division by zero)".to_string(),
            ));
        }

        Ok(MetricResult::new(Self::ID)
            .with_value("jitter_mean", sum / count as f64)
            .with_value("jitter_max", max)
            .with_metadata("measured_triples", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn context() -> CategoryContext {
        CategoryContext::new("pose", vec!["pose".to_string()], vec!["engineA.pose".to_string()])
    }

    #[test]
    fn test_linear_motion_has_no_jitter() {
        let mut array = ArrayD::<f64>::zeros(IxDyn(&[6, 2, 2]));
        for t in 0..6 {
            for p in 0..2 {
                array[[t, p, 0]] = t as f64 * 0.5;
                array[[t, p, 1]] = p as f64;
            }
        }
        let result = Jitter::new().calculate(&context(), &array).expect("calculate");
        assert!(result.value("jitter_mean").unwrap_or(f64::NAN).abs() < 1e-12);
        assert!(result.value("jitter_max").unwrap_or(f64::NAN).abs() < 1e-12);
    }

    #[test]
    fn test_single_spike() {
        // One point, one dimension: 0, 0, 1, 0, 0 -> accelerations 1, -2, 1.
        let array =
            ArrayD::from_shape_vec(IxDyn(&[5, 1, 1]), vec![0.0, 0.0, 1.0, 0.0, 0.0]).expect("shape");
        let result = Jitter::new().calculate(&context(), &array).expect("calculate");
        assert!((result.value("jitter_mean").unwrap_or(f64::NAN) - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(result.value("jitter_max"), Some(2.0));
    }

    #[test]
    fn test_missing_values_skip_triples() {
        let array = ArrayD::from_shape_vec(
            IxDyn(&[4, 1, 1]),
            vec![0.0, f64::NAN, 0.0, 0.0],
        )
        .expect("shape");
        // Both triples touch frame 1, so nothing can be measured.
        assert!(matches!(
            Jitter::new().calculate(&context(), &array),
            Err(MetricFault::Numeric(_))
        ));
    }

    #[test]
    fn test_too_few_frames() {
        let array = ArrayD::<f64>::zeros(IxDyn(&[2, 5, 3]));
        assert!(matches!(
            Jitter::new().calculate(&context(), &array),
            Err(MetricFault::PreconditionViolation(_))
        ));
        assert!(Jitter::from_params(&MetricParams::new().with("min_frames", 2)).is_err());
    }
}
