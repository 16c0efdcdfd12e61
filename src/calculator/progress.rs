//! Background progress monitor for calculation runs.
//!
//! Periodically logs how many samples were committed, how many carried
//! faults, and how many evaluated samples wait in the reorder buffer, so
//! operators can follow long runs without per-sample log lines.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Snapshot of run progress counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    /// Samples committed in this run.
    pub committed: usize,
    /// Committed samples with at least one fault.
    pub faulted: usize,
    /// Evaluated samples waiting for an earlier sample to commit.
    pub buffered: usize,
    /// Samples currently being evaluated.
    pub in_flight: usize,
    /// Wall-clock elapsed time since the monitor started.
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Commits per second since the monitor started.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.committed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Shared atomic counters updated by workers and the coordinator.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub committed: Arc<AtomicUsize>,
    pub faulted: Arc<AtomicUsize>,
    pub buffered: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of the current counter values.
    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs run progress.
///
/// Call [`ProgressMonitor::stop`] to cancel it.
pub struct ProgressMonitor {
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Start a monitor that logs every `interval`.
    ///
    /// `pending` is the number of samples this run has to commit and is
    /// used for the progress percentage.
    pub fn start(counters: ProgressCounters, pending: usize, interval: Duration) -> Self {
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;

                let snap = counters.snapshot(start);
                let pct = if pending > 0 {
                    (snap.committed as f64 / pending as f64 * 100.0).min(100.0)
                } else {
                    100.0
                };

                tracing::info!(
                    committed = snap.committed,
                    pending = pending,
                    faulted = snap.faulted,
                    buffered = snap.buffered,
                    in_flight = snap.in_flight,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    samples_per_sec = format!("{:.2}", snap.rate()),
                    "Calculation progress"
                );
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    /// Stop the monitor and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_rate() {
        let counters = ProgressCounters::new();
        counters.committed.fetch_add(10, Ordering::Relaxed);
        counters.buffered.store(3, Ordering::Relaxed);

        let snap = counters.snapshot(Instant::now() - Duration::from_secs(2));
        assert_eq!(snap.committed, 10);
        assert_eq!(snap.buffered, 3);
        assert!((snap.rate() - 5.0).abs() < 0.1);
    }

    #[tokio::test]
    async fn test_monitor_stops_promptly() {
        let monitor =
            ProgressMonitor::start(ProgressCounters::new(), 10, Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("stop does not wait for the next tick");
    }
}
