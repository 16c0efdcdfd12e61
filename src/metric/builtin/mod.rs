//! Built-in landmark quality metrics.

mod jitter;
mod missing_rate;
mod missing_values;

pub use jitter::Jitter;
pub use missing_rate::MissingRate;
pub use missing_values::MissingValues;

use crate::metric::Metric;
use crate::registry::MetricRegistration;

/// Registrations for every built-in metric.
pub fn registrations() -> Vec<MetricRegistration> {
    vec![
        MetricRegistration::new(MissingRate::ID, MissingRate::DESCRIPTION, |params| {
            MissingRate::from_params(params).map(|m| Box::new(m) as Box<dyn Metric>)
        }),
        MetricRegistration::new(Jitter::ID, Jitter::DESCRIPTION, |params| {
            Jitter::from_params(params).map(|m| Box::new(m) as Box<dyn Metric>)
        }),
        MetricRegistration::new(MissingValues::ID, MissingValues::DESCRIPTION, |params| {
            MissingValues::from_params(params).map(|m| Box::new(m) as Box<dyn Metric>)
        }),
    ]
}
