//! Parallel calculation engine.
//!
//! A [`Calculator`] is built once from calculation specs, category
//! definitions and a metric registry; all configuration errors surface there,
//! before any sample is read. [`Calculator::run`] then evaluates a dataset:
//!
//! ```text
//!  ascending index queue ──► workers (spawn_blocking) ──► mpsc ──► coordinator
//!            ▲                                                        │
//!            └──────────── reorder window permits ◄── commit ─────────┘
//! ```
//!
//! Workers evaluate samples concurrently; the coordinator commits them in
//! ascending index order, so every bucket sees the same update sequence no
//! matter how many workers ran or whether the run was resumed from a
//! checkpoint.

mod checkpoint;
mod coordinator;
mod evaluator;
mod plan;
mod progress;
mod shutdown;
mod worker;

pub use checkpoint::{BucketState, Checkpoint, CheckpointError, RunCounters, FORMAT_VERSION};
pub use evaluator::{evaluate_sample, SampleOutcome, UnitOutcome, UnitResult};
pub use plan::{Plan, PlannedCalculation};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use shutdown::ShutdownSignal;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::categories::CategoryDefinitions;
use crate::config::{CalculationSpec, ExecutionOptions, Manifest};
use crate::dataset::Dataset;
use crate::error::ConfigError;
use crate::registry::MetricRegistry;
use crate::report::{Report, RunMetadata};
use crate::telemetry::MetricsCollector;

use coordinator::{ReorderBuffer, RunState};
use worker::Worker;

/// Default interval between progress log lines.
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Fatal errors of a calculation run.
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(CheckpointError),
}

impl From<CheckpointError> for CalculatorError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::Mismatch(reason) => CalculatorError::CheckpointMismatch(reason),
            other => CalculatorError::Checkpoint(other),
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the configured worker count.
    pub workers: Option<usize>,
    /// Where checkpoints are written (and read when resuming).
    pub checkpoint_path: Option<PathBuf>,
    /// Continue from `checkpoint_path` if it exists.
    pub resume: bool,
    /// Stops dispatch of new samples when triggered.
    pub shutdown: ShutdownSignal,
    /// Triggers `shutdown` after this many commits.
    pub stop_after: Option<usize>,
    /// Interval between progress log lines.
    pub progress_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: None,
            checkpoint_path: None,
            resume: false,
            shutdown: ShutdownSignal::new(),
            stop_after: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_stop_after(mut self, commits: usize) -> Self {
        self.stop_after = Some(commits);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Validated calculation engine.
#[derive(Debug)]
pub struct Calculator {
    plan: Arc<Plan>,
    options: ExecutionOptions,
    metrics: MetricsCollector,
}

impl Calculator {
    /// Validates the specs and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for unknown metrics, rejected parameters,
    /// category cycles or invalid options. No dataset is touched.
    pub fn new(
        specs: &[CalculationSpec],
        definitions: &CategoryDefinitions,
        registry: &MetricRegistry,
        options: ExecutionOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let plan = Plan::build(specs, definitions, registry, options.source_priority.clone())?;

        info!(
            calculations = plan.calculations().len(),
            units_per_sample = plan.unit_count(),
            fingerprint = %plan.fingerprint(),
            "Calculator ready"
        );

        Ok(Self {
            plan: Arc::new(plan),
            options,
            metrics: MetricsCollector::new(),
        })
    }

    /// Builds the engine from a parsed manifest.
    pub fn from_manifest(
        manifest: &Manifest,
        registry: &MetricRegistry,
        options: ExecutionOptions,
    ) -> Result<Self, ConfigError> {
        Self::new(&manifest.calculations, &manifest.categories, registry, options)
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Evaluates every sample of `dataset` that is not already completed.
    ///
    /// Per-unit faults are recorded in the report and never abort the run.
    /// When resuming, units that ended in a storage fault are evaluated again.
    ///
    /// # Errors
    ///
    /// - `CheckpointMismatch` if resuming from a checkpoint written for
    ///   another configuration or dataset
    /// - `Checkpoint` if the checkpoint cannot be read, or the final one
    ///   cannot be written
    pub async fn run(
        &self,
        dataset: Arc<dyn Dataset>,
        options: RunOptions,
    ) -> Result<Report, CalculatorError> {
        let started = Instant::now();
        let identity = dataset.identity();
        let total = dataset.len();

        let execution = match options.workers {
            Some(workers) => self.options.clone().with_workers(workers),
            None => self.options.clone(),
        };
        execution.validate()?;
        let workers = execution.workers;
        let window_size = execution.effective_reorder_window();

        let mut state = self.initial_state(&identity, total, &options)?;
        let pending = state.pending(total);

        info!(
            dataset = %identity,
            total,
            pending = pending.len(),
            resumed = state.resumed_samples(),
            retrying = state.retry_count(),
            workers,
            reorder_window = window_size,
            "Starting calculation run"
        );

        let counters = ProgressCounters::new();
        let monitor = ProgressMonitor::start(counters.clone(), pending.len(), options.progress_interval);

        let window = Arc::new(Semaphore::new(window_size));
        let queue = Arc::new(Mutex::new(pending.clone().into_iter()));
        let (tx, mut rx) = mpsc::channel::<SampleOutcome>(window_size);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker {
                id,
                dataset: Arc::clone(&dataset),
                plan: Arc::clone(&self.plan),
                queue: Arc::clone(&queue),
                window: Arc::clone(&window),
                results: tx.clone(),
                shutdown: options.shutdown.clone(),
                counters: counters.clone(),
                metrics: self.metrics,
            };
            handles.push(tokio::spawn(worker.run()));
        }
        drop(tx);

        let mut reorder = ReorderBuffer::new(pending);
        let mut committed = 0usize;
        let mut since_checkpoint = 0usize;

        while let Some(outcome) = rx.recv().await {
            reorder.insert(outcome);

            while let Some(ready) = reorder.pop_ready() {
                let faulted = ready.has_fault();
                state.commit(&self.plan, ready, &self.metrics);
                window.add_permits(1);

                committed += 1;
                since_checkpoint += 1;
                counters.committed.fetch_add(1, Ordering::Relaxed);
                if faulted {
                    counters.faulted.fetch_add(1, Ordering::Relaxed);
                }

                if since_checkpoint >= execution.checkpoint_interval {
                    since_checkpoint = 0;
                    if let Some(path) = &options.checkpoint_path {
                        if let Err(e) = self.save_checkpoint(&state, path, &identity, total) {
                            warn!(error = %e, path = %path.display(), "Periodic checkpoint failed, continuing");
                        }
                    }
                }

                if let Some(limit) = options.stop_after {
                    if committed >= limit && !options.shutdown.is_triggered() {
                        info!(committed, "Commit limit reached, stopping dispatch");
                        options.shutdown.trigger();
                    }
                }
            }

            counters.buffered.store(reorder.len(), Ordering::Relaxed);
            self.metrics.update_reorder_buffer(reorder.len());
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task failed");
            }
        }
        monitor.stop().await;

        if !reorder.is_empty() {
            warn!(
                discarded = reorder.len(),
                "Evaluated samples could not be committed in order and will be re-evaluated on resume"
            );
        }
        self.metrics.update_reorder_buffer(0);

        if let Some(path) = &options.checkpoint_path {
            self.save_checkpoint(&state, path, &identity, total)?;
        }

        let interrupted = state.completed_count() < total || state.retry_count() > 0;
        if interrupted {
            warn!(
                completed = state.completed_count(),
                total,
                "Run interrupted before all samples were committed"
            );
        }

        let counters = state.counters();
        let report = Report {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                dataset: identity,
                total_samples: total,
                processed_samples: state.completed_count(),
                resumed_samples: state.resumed_samples(),
                faulted_samples: counters.faulted_samples,
                units_evaluated: counters.units_ok + counters.units_faulted,
                units_faulted: counters.units_faulted,
                workers,
                duration_secs: started.elapsed().as_secs_f64(),
                interrupted,
                checkpoint: options.checkpoint_path.clone(),
            },
            calculations: state.summarize(&self.plan),
            faults: state.sorted_faults(),
        };

        info!(
            committed,
            processed = report.metadata.processed_samples,
            faults = report.faults.len(),
            duration_secs = format!("{:.2}", report.metadata.duration_secs),
            "Calculation run finished"
        );

        Ok(report)
    }

    /// Fresh state, or the state restored from the checkpoint when resuming.
    fn initial_state(
        &self,
        identity: &str,
        total: usize,
        options: &RunOptions,
    ) -> Result<RunState, CalculatorError> {
        let path = match (&options.checkpoint_path, options.resume) {
            (Some(path), true) => path,
            (None, true) => {
                warn!("Resume requested without a checkpoint path, starting fresh");
                return Ok(RunState::new(&self.plan));
            }
            (_, false) => return Ok(RunState::new(&self.plan)),
        };

        let Some(checkpoint) = Checkpoint::load(path)? else {
            warn!(path = %path.display(), "No checkpoint found, starting fresh");
            return Ok(RunState::new(&self.plan));
        };

        checkpoint.verify(self.plan.fingerprint(), identity, total)?;
        let state = RunState::restore(&self.plan, checkpoint)?;
        info!(
            path = %path.display(),
            completed = state.completed_count(),
            "Resuming from checkpoint"
        );
        Ok(state)
    }

    fn save_checkpoint(
        &self,
        state: &RunState,
        path: &Path,
        identity: &str,
        total: usize,
    ) -> Result<(), CheckpointError> {
        let result = state
            .to_checkpoint(&self.plan, identity, total)
            .and_then(|checkpoint| checkpoint.save(path));
        self.metrics.record_checkpoint(result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use ndarray::{ArrayD, IxDyn};
    use tempfile::TempDir;

    fn dataset(samples: usize) -> Arc<dyn Dataset> {
        let mut ds = InMemoryDataset::new("calc");
        for s in 0..samples {
            let array = ArrayD::from_shape_fn(IxDyn(&[6, 4, 2]), |idx| {
                ((s + 1) * (idx[0] * idx[0] + idx[1])) as f64 / 10.0 + idx[2] as f64
            });
            ds.push_sample([("engineA.pose", array)]);
        }
        Arc::new(ds)
    }

    fn calculator(workers: usize) -> Calculator {
        Calculator::new(
            &[
                CalculationSpec::new("jitter", ["pose"]),
                CalculationSpec::new("missing-values", ["pose"]),
            ],
            &CategoryDefinitions::new(),
            &MetricRegistry::builtin(),
            ExecutionOptions::default()
                .with_workers(workers)
                .with_checkpoint_interval(3)
                .with_reorder_window(2),
        )
        .expect("calculator")
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_results() {
        let data = dataset(20);
        let single = calculator(1)
            .run(Arc::clone(&data), RunOptions::new())
            .await
            .expect("run");
        let many = calculator(4)
            .run(data, RunOptions::new())
            .await
            .expect("run");

        assert!(single.same_results(&many));
        assert_eq!(many.metadata.processed_samples, 20);
        assert_eq!(many.metadata.units_evaluated, 40);
        assert!(!many.metadata.interrupted);
    }

    #[tokio::test]
    async fn test_stop_after_interrupts_and_checkpoints() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("checkpoint.json");

        let report = calculator(2)
            .run(
                dataset(30),
                RunOptions::new().with_checkpoint(&path).with_stop_after(5),
            )
            .await
            .expect("run");

        assert!(report.metadata.interrupted);
        assert!(report.metadata.processed_samples >= 5);
        assert!(report.metadata.processed_samples < 30);

        let checkpoint = Checkpoint::load(&path).expect("load").expect("written");
        assert_eq!(checkpoint.completed.len(), report.metadata.processed_samples);
    }

    #[tokio::test]
    async fn test_resume_rejects_other_configuration() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("checkpoint.json");
        calculator(1)
            .run(dataset(4), RunOptions::new().with_checkpoint(&path))
            .await
            .expect("first run");

        let other = Calculator::new(
            &[CalculationSpec::new("missing-rate", ["pose"])],
            &CategoryDefinitions::new(),
            &MetricRegistry::builtin(),
            ExecutionOptions::default(),
        )
        .expect("calculator");
        let err = other
            .run(
                dataset(4),
                RunOptions::new().with_checkpoint(&path).with_resume(true),
            )
            .await
            .expect_err("mismatch");
        assert!(matches!(err, CalculatorError::CheckpointMismatch(_)));
    }

    #[tokio::test]
    async fn test_pre_triggered_shutdown_processes_nothing() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let report = calculator(2)
            .run(dataset(5), RunOptions::new().with_shutdown(shutdown))
            .await
            .expect("run");
        assert_eq!(report.metadata.processed_samples, 0);
        assert!(report.metadata.interrupted);
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let report = calculator(2)
            .run(Arc::new(InMemoryDataset::new("none")), RunOptions::new())
            .await
            .expect("run");
        assert_eq!(report.metadata.total_samples, 0);
        assert!(!report.metadata.interrupted);
        assert_eq!(report.calculations[0].categories[0].summary.count, 0);
    }
}
