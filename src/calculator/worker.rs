//! Worker tasks evaluating samples.
//!
//! Each worker repeatedly takes a window permit, pulls the next pending
//! index from the shared ascending queue, evaluates the sample on the
//! blocking pool and sends the outcome to the coordinator. The permit is
//! handed back by the coordinator once the sample is committed, which bounds
//! the number of dispatched but uncommitted samples.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error};

use crate::dataset::Dataset;
use crate::error::UnitFault;
use crate::telemetry::MetricsCollector;

use super::evaluator::{evaluate_sample, panic_message, SampleOutcome};
use super::plan::Plan;
use super::progress::ProgressCounters;
use super::shutdown::ShutdownSignal;

/// Pending sample indices in ascending order.
pub type SampleQueue = Arc<Mutex<std::vec::IntoIter<usize>>>;

/// Everything a worker task needs.
pub struct Worker {
    pub id: usize,
    pub dataset: Arc<dyn Dataset>,
    pub plan: Arc<Plan>,
    pub queue: SampleQueue,
    pub window: Arc<Semaphore>,
    pub results: mpsc::Sender<SampleOutcome>,
    pub shutdown: ShutdownSignal,
    pub counters: ProgressCounters,
    pub metrics: MetricsCollector,
}

impl Worker {
    /// Main worker loop. Returns when the queue is drained, shutdown was
    /// requested, or the coordinator went away.
    pub async fn run(self) {
        debug!(worker_id = self.id, "Worker started");
        let mut evaluated = 0usize;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let permit = match Arc::clone(&self.window).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // Shutdown may have been requested while waiting for the window.
            if self.shutdown.is_triggered() {
                break;
            }

            let next = self.queue.lock().await.next();
            let Some(index) = next else {
                break;
            };

            // Returned by the coordinator after the commit.
            permit.forget();

            self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
            self.metrics.inc_active_workers();

            let dataset = Arc::clone(&self.dataset);
            let plan = Arc::clone(&self.plan);
            let joined =
                tokio::task::spawn_blocking(move || evaluate_sample(dataset.as_ref(), &plan, index))
                    .await;

            self.metrics.dec_active_workers();
            self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(worker_id = self.id, sample = index, error = %e, "Sample evaluation panicked");
                    SampleOutcome::uniform(
                        &self.plan,
                        index,
                        UnitFault::WorkerPanic(join_error_message(e)),
                    )
                }
            };

            evaluated += 1;
            if self.results.send(outcome).await.is_err() {
                break;
            }
        }

        debug!(worker_id = self.id, evaluated, "Worker stopped");
    }
}

/// Metric panics are caught per unit; this covers panics outside any metric.
fn join_error_message(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic().as_ref())
    } else {
        err.to_string()
    }
}
