//! Recording helpers for engine telemetry.

use std::time::Duration;

use crate::error::FaultKind;

use super::prometheus::{
    ACTIVE_WORKERS, CHECKPOINTS_TOTAL, FAULTS_TOTAL, REORDER_BUFFER, SAMPLES_COMMITTED,
    UNITS_TOTAL, UNIT_DURATION,
};

/// Status label of a unit that produced a result.
const STATUS_OK: &str = "ok";

/// Thin recorder over the global series.
///
/// Every method is a no-op until [`super::init_metrics`] has run, so library
/// users that never initialize telemetry pay nothing beyond an atomic load.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records one evaluated unit. `fault` is `None` for a successful unit.
    pub fn record_unit(&self, metric: &str, fault: Option<FaultKind>, duration: Duration) {
        let status = fault.map_or(STATUS_OK, |kind| kind.as_str());

        if let Some(units_total) = UNITS_TOTAL.get() {
            units_total.with_label_values(&[metric, status]).inc();
        }

        if let Some(kind) = fault {
            if let Some(faults_total) = FAULTS_TOTAL.get() {
                faults_total.with_label_values(&[kind.as_str()]).inc();
            }
        }

        if let Some(unit_duration) = UNIT_DURATION.get() {
            unit_duration
                .with_label_values(&[metric])
                .observe(duration.as_secs_f64());
        }
    }

    /// Records one committed sample.
    pub fn record_commit(&self) {
        if let Some(committed) = SAMPLES_COMMITTED.get() {
            committed.inc();
        }
    }

    /// Records a checkpoint write attempt.
    pub fn record_checkpoint(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        if let Some(checkpoints) = CHECKPOINTS_TOTAL.get() {
            checkpoints.with_label_values(&[status]).inc();
        }
    }

    /// Increment the number of busy workers.
    pub fn inc_active_workers(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.inc();
        }
    }

    /// Decrement the number of busy workers.
    pub fn dec_active_workers(&self) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.dec();
        }
    }

    /// Sets the current reorder buffer depth.
    pub fn update_reorder_buffer(&self, depth: usize) {
        if let Some(gauge) = REORDER_BUFFER.get() {
            gauge.set(depth as f64);
        }
    }
}
