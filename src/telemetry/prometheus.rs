//! Prometheus metrics registration and export.
//!
//! All series live in a process-wide registry behind `OnceLock` statics so
//! recording never needs a handle passed around.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, IntCounter, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all landmark-qc series.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Evaluated units, labeled by metric and status (`ok` or a fault kind).
pub static UNITS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Recorded faults, labeled by kind.
pub static FAULTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Samples committed by the coordinator.
pub static SAMPLES_COMMITTED: OnceLock<IntCounter> = OnceLock::new();

/// Checkpoint writes, labeled by status.
pub static CHECKPOINTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Unit evaluation duration in seconds, labeled by metric.
pub static UNIT_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Workers currently evaluating a sample.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Evaluated samples waiting in the reorder buffer.
pub static REORDER_BUFFER: OnceLock<Gauge> = OnceLock::new();

/// Initialize all series and register them with the registry.
///
/// Calling it again is harmless: the first registration wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a series cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let units_total = CounterVec::new(
        Opts::new("landmark_qc_units_total", "Evaluated (sample, category, calculation) units"),
        &["metric", "status"],
    )?;

    let faults_total = CounterVec::new(
        Opts::new("landmark_qc_faults_total", "Recorded per-unit faults"),
        &["kind"],
    )?;

    let samples_committed = IntCounter::new(
        "landmark_qc_samples_committed_total",
        "Samples committed in ascending order",
    )?;

    let checkpoints_total = CounterVec::new(
        Opts::new("landmark_qc_checkpoints_total", "Checkpoint writes"),
        &["status"],
    )?;

    let unit_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "landmark_qc_unit_duration_seconds",
            "Unit evaluation duration in seconds",
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["metric"],
    )?;

    let active_workers = Gauge::new(
        "landmark_qc_active_workers",
        "Workers currently evaluating a sample",
    )?;

    let reorder_buffer = Gauge::new(
        "landmark_qc_reorder_buffer",
        "Evaluated samples waiting for in-order commit",
    )?;

    registry.register(Box::new(units_total.clone()))?;
    registry.register(Box::new(faults_total.clone()))?;
    registry.register(Box::new(samples_committed.clone()))?;
    registry.register(Box::new(checkpoints_total.clone()))?;
    registry.register(Box::new(unit_duration.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(reorder_buffer.clone()))?;

    // Already initialized when a set fails.
    let _ = REGISTRY.set(registry);
    let _ = UNITS_TOTAL.set(units_total);
    let _ = FAULTS_TOTAL.set(faults_total);
    let _ = SAMPLES_COMMITTED.set(samples_committed);
    let _ = CHECKPOINTS_TOTAL.set(checkpoints_total);
    let _ = UNIT_DURATION.set(unit_duration);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = REORDER_BUFFER.set(reorder_buffer);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered series in Prometheus text format.
///
/// Returns a comment line instead when the registry is not initialized or
/// encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
