//! Metric execution contract.
//!
//! A metric is a stateless function from one sample's category array to a
//! [`MetricResult`]. Metrics are built once per calculation from a parameter
//! bag and shared read-only between worker threads.

pub mod builtin;
mod params;
mod result;

pub use params::{MetricBuildError, MetricParams};
pub use result::MetricResult;

use ndarray::ArrayD;
use thiserror::Error;

use crate::aggregate::AggregationStrategy;
use crate::error::UnitFault;

/// Failure raised by a metric for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricFault {
    /// A declared input requirement is not met (e.g. too few frames).
    #[error("{0}")]
    PreconditionViolation(String),

    /// The computation itself failed (e.g. division by zero).
    #[error("{0}")]
    Numeric(String),
}

impl From<MetricFault> for UnitFault {
    fn from(fault: MetricFault) -> Self {
        match fault {
            MetricFault::PreconditionViolation(m) => UnitFault::PreconditionViolation(m),
            MetricFault::Numeric(m) => UnitFault::Numeric(m),
        }
    }
}

/// The category a metric is evaluated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryContext {
    /// Display name of the resolved category.
    pub name: String,
    /// Leaf names the category resolved to.
    pub leaves: Vec<String>,
    /// Concrete array names selected for each leaf in this sample.
    pub sources: Vec<String>,
}

impl CategoryContext {
    pub fn new(name: impl Into<String>, leaves: Vec<String>, sources: Vec<String>) -> Self {
        Self {
            name: name.into(),
            leaves,
            sources,
        }
    }
}

/// A pluggable quality metric.
///
/// Implementations must be side-effect free and must not keep references to
/// their input after `calculate` returns.
pub trait Metric: Send + Sync {
    /// Registry identifier.
    fn id(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Computes the result for one category array of one sample.
    fn calculate(
        &self,
        category: &CategoryContext,
        array: &ArrayD<f64>,
    ) -> Result<MetricResult, MetricFault>;

    /// How results of this metric are aggregated when the calculation does
    /// not override it.
    fn aggregation(&self) -> AggregationStrategy {
        AggregationStrategy::PerKeyWelford
    }
}

/// Number of frames of a `(frames, ...)` array, checking a minimum.
pub(crate) fn require_frames(array: &ArrayD<f64>, min_frames: usize) -> Result<usize, MetricFault> {
    if array.ndim() == 0 {
        return Err(MetricFault::PreconditionViolation(
            "array has no frame axis".to_string(),
        ));
    }
    let frames = array.shape()[0];
    if frames < min_frames {
        return Err(MetricFault::PreconditionViolation(format!(
            "need at least {} frame(s), found {}",
            min_frames, frames
        )));
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_metric_fault_maps_to_unit_fault() {
        let unit: UnitFault = MetricFault::Numeric("division by zero".to_string()).into();
        assert_eq!(unit, UnitFault::Numeric("division by zero".to_string()));
    }

    #[test]
    fn test_require_frames() {
        let array = ArrayD::<f64>::zeros(IxDyn(&[2, 5, 3]));
        assert_eq!(require_frames(&array, 1), Ok(2));
        assert!(matches!(
            require_frames(&array, 3),
            Err(MetricFault::PreconditionViolation(_))
        ));
        let scalar = ArrayD::<f64>::zeros(IxDyn(&[]));
        assert!(require_frames(&scalar, 0).is_err());
    }
}
