//! In-order commit of evaluated samples.
//!
//! The coordinator is the only owner of aggregation state. Workers finish
//! samples in any order; [`ReorderBuffer`] holds them until every earlier
//! pending sample has been committed, then [`RunState::commit`] folds each
//! unit into its bucket or records its fault.
//!
//! Units that ended in a storage fault are retried when a run resumes from a
//! checkpoint. Only those units are re-applied; the rest of the sample was
//! already folded in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::aggregate::Aggregator;
use crate::categories::ResolvedCategory;
use crate::error::{FaultKind, UnitFault};
use crate::report::{CalculationReport, CategoryReport, FaultRecord};
use crate::telemetry::MetricsCollector;

use super::checkpoint::{BucketState, Checkpoint, CheckpointError, RunCounters, FORMAT_VERSION};
use super::evaluator::{SampleOutcome, UnitOutcome};
use super::plan::{Plan, PlannedCalculation};

/// Holds out-of-order outcomes until their turn.
#[derive(Debug)]
pub struct ReorderBuffer {
    order: Vec<usize>,
    next: usize,
    waiting: BTreeMap<usize, SampleOutcome>,
}

impl ReorderBuffer {
    /// `order` lists the pending sample indices in commit order.
    pub fn new(order: Vec<usize>) -> Self {
        Self {
            order,
            next: 0,
            waiting: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, outcome: SampleOutcome) {
        self.waiting.insert(outcome.index, outcome);
    }

    /// Next outcome whose turn has come, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<SampleOutcome> {
        let index = *self.order.get(self.next)?;
        let outcome = self.waiting.remove(&index)?;
        self.next += 1;
        Some(outcome)
    }

    /// Outcomes waiting for an earlier sample.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}

/// Aggregation state of a run.
pub struct RunState {
    /// `buckets[calculation][category]`, in plan order.
    buckets: Vec<Vec<Box<dyn Aggregator>>>,
    completed: BTreeSet<usize>,
    faults: Vec<FaultRecord>,
    counters: RunCounters,
    resumed_samples: usize,
    /// Committed samples with `(calculation, category)` units to evaluate again.
    retry: BTreeMap<usize, BTreeSet<(usize, usize)>>,
}

impl RunState {
    /// Empty buckets for every unit of the plan.
    pub fn new(plan: &Plan) -> Self {
        let buckets = plan
            .calculations()
            .iter()
            .map(|calc| calc.categories.iter().map(|_| calc.factory.create()).collect())
            .collect();

        Self {
            buckets,
            completed: BTreeSet::new(),
            faults: Vec::new(),
            counters: RunCounters::default(),
            resumed_samples: 0,
            retry: BTreeMap::new(),
        }
    }

    /// Rebuilds the state from a verified checkpoint.
    pub fn restore(plan: &Plan, mut checkpoint: Checkpoint) -> Result<Self, CheckpointError> {
        let mut buckets = Vec::with_capacity(plan.calculations().len());

        for calc in plan.calculations() {
            let mut row = Vec::with_capacity(calc.categories.len());
            for category in &calc.categories {
                let key = calc.bucket_key(category);
                let saved = checkpoint.buckets.remove(&key).ok_or_else(|| {
                    CheckpointError::Mismatch(format!("bucket '{}' missing from checkpoint", key))
                })?;
                if saved.aggregator != calc.factory.name() {
                    return Err(CheckpointError::Mismatch(format!(
                        "bucket '{}' was aggregated with '{}', not '{}'",
                        key,
                        saved.aggregator,
                        calc.factory.name()
                    )));
                }
                row.push(calc.factory.restore(saved.state)?);
            }
            buckets.push(row);
        }

        if !checkpoint.buckets.is_empty() {
            let extra: Vec<String> = checkpoint.buckets.into_keys().collect();
            return Err(CheckpointError::Mismatch(format!(
                "checkpoint has unknown buckets: {}",
                extra.join(", ")
            )));
        }

        let resumed_samples = checkpoint.completed.len();
        let retry = storage_retries(plan, &checkpoint.faults);
        if !retry.is_empty() {
            info!(samples = retry.len(), "Retrying units that hit storage faults");
        }

        Ok(Self {
            buckets,
            completed: checkpoint.completed,
            faults: checkpoint.faults,
            counters: checkpoint.counters,
            resumed_samples,
            retry,
        })
    }

    /// Samples this run evaluates, ascending: never committed ones plus
    /// committed ones with units to retry.
    pub fn pending(&self, total: usize) -> Vec<usize> {
        (0..total)
            .filter(|i| !self.completed.contains(i) || self.retry.contains_key(i))
            .collect()
    }

    /// Committed samples still waiting for a retry.
    pub fn retry_count(&self) -> usize {
        self.retry.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn resumed_samples(&self) -> usize {
        self.resumed_samples
    }

    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    /// Applies every unit of a sample: results go to their bucket, faults
    /// to the fault list.
    pub fn commit(&mut self, plan: &Plan, outcome: SampleOutcome, metrics: &MetricsCollector) {
        let sample = outcome.index;
        if let Some(units) = self.retry.remove(&sample) {
            self.commit_retry(plan, outcome, &units, metrics);
            return;
        }

        let mut faulted = false;
        for unit in outcome.units {
            let Some((calc, category)) = resolve_unit(plan, sample, &unit) else {
                continue;
            };

            match unit.result {
                Ok(result) => {
                    self.buckets[unit.spec_index][unit.category_index].update(&result);
                    self.counters.units_ok += 1;
                    metrics.record_unit(&calc.spec.metric, None, unit.elapsed);
                }
                Err(fault) => {
                    faulted = true;
                    self.counters.units_faulted += 1;
                    metrics.record_unit(&calc.spec.metric, Some(fault.kind()), unit.elapsed);
                    self.record_fault(sample, calc, category, &fault);
                }
            }
        }

        if faulted {
            self.counters.faulted_samples += 1;
        }
        self.completed.insert(sample);
        metrics.record_commit();
    }

    /// Re-applies only the listed units of an already committed sample. Each
    /// one replaces its storage fault, either with a bucket update or with
    /// the fault it hit this time.
    fn commit_retry(
        &mut self,
        plan: &Plan,
        outcome: SampleOutcome,
        units: &BTreeSet<(usize, usize)>,
        metrics: &MetricsCollector,
    ) {
        let sample = outcome.index;
        let mut recovered = 0usize;

        for unit in outcome.units {
            if !units.contains(&(unit.spec_index, unit.category_index)) {
                continue;
            }
            let Some((calc, category)) = resolve_unit(plan, sample, &unit) else {
                continue;
            };

            self.faults.retain(|f| {
                !(f.sample == sample
                    && f.spec_index == unit.spec_index
                    && f.category == category.name
                    && f.kind == FaultKind::Storage)
            });

            match unit.result {
                Ok(result) => {
                    self.buckets[unit.spec_index][unit.category_index].update(&result);
                    self.counters.units_ok += 1;
                    self.counters.units_faulted = self.counters.units_faulted.saturating_sub(1);
                    metrics.record_unit(&calc.spec.metric, None, unit.elapsed);
                    recovered += 1;
                }
                Err(fault) => {
                    metrics.record_unit(&calc.spec.metric, Some(fault.kind()), unit.elapsed);
                    self.record_fault(sample, calc, category, &fault);
                }
            }
        }

        if !self.faults.iter().any(|f| f.sample == sample) {
            self.counters.faulted_samples = self.counters.faulted_samples.saturating_sub(1);
        }
        debug!(sample, recovered, retried = units.len(), "Committed retried units");
        metrics.record_commit();
    }

    fn record_fault(
        &mut self,
        sample: usize,
        calc: &PlannedCalculation,
        category: &ResolvedCategory,
        fault: &UnitFault,
    ) {
        debug!(
            sample,
            metric = %calc.spec.metric,
            category = %category.name,
            kind = %fault.kind(),
            error = %fault,
            "Recorded unit fault"
        );
        self.faults.push(FaultRecord {
            sample,
            spec_index: calc.spec_index,
            metric: calc.spec.metric.clone(),
            category: category.name.clone(),
            kind: fault.kind(),
            message: fault.message().to_string(),
        });
    }

    /// Serializes the current state.
    pub fn to_checkpoint(
        &self,
        plan: &Plan,
        dataset: &str,
        total_samples: usize,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut buckets = BTreeMap::new();
        for (calc, row) in plan.calculations().iter().zip(&self.buckets) {
            for (category, bucket) in calc.categories.iter().zip(row) {
                buckets.insert(
                    calc.bucket_key(category),
                    BucketState {
                        aggregator: calc.factory.name().to_string(),
                        state: bucket.snapshot()?,
                    },
                );
            }
        }

        Ok(Checkpoint {
            format_version: FORMAT_VERSION,
            fingerprint: plan.fingerprint().to_string(),
            dataset: dataset.to_string(),
            total_samples,
            completed: self.completed.clone(),
            buckets,
            faults: self.faults.clone(),
            counters: self.counters,
            saved_at: Utc::now(),
        })
    }

    /// Finalizes every bucket into per-calculation reports.
    pub fn summarize(&self, plan: &Plan) -> Vec<CalculationReport> {
        plan.calculations()
            .iter()
            .zip(&self.buckets)
            .map(|(calc, row)| CalculationReport {
                spec_index: calc.spec_index,
                metric: calc.spec.metric.clone(),
                params: calc.spec.params.clone(),
                aggregator: calc.factory.name().to_string(),
                categories: calc
                    .categories
                    .iter()
                    .zip(row)
                    .map(|(category, bucket)| CategoryReport {
                        name: category.name.clone(),
                        leaves: category.leaves.clone(),
                        summary: bucket.finalize(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Faults sorted by sample, then plan order.
    pub fn sorted_faults(&self) -> Vec<FaultRecord> {
        let mut faults = self.faults.clone();
        faults.sort_by_key(|f| (f.sample, f.spec_index));
        faults
    }
}

fn resolve_unit<'p>(
    plan: &'p Plan,
    sample: usize,
    unit: &UnitOutcome,
) -> Option<(&'p PlannedCalculation, &'p ResolvedCategory)> {
    let Some(calc) = plan.calculations().get(unit.spec_index) else {
        warn!(sample, spec_index = unit.spec_index, "Dropping unit for unknown calculation");
        return None;
    };
    let Some(category) = calc.categories.get(unit.category_index) else {
        warn!(sample, category_index = unit.category_index, "Dropping unit for unknown category");
        return None;
    };
    Some((calc, category))
}

/// Units recorded with a storage fault, keyed by sample.
fn storage_retries(
    plan: &Plan,
    faults: &[FaultRecord],
) -> BTreeMap<usize, BTreeSet<(usize, usize)>> {
    let mut retry: BTreeMap<usize, BTreeSet<(usize, usize)>> = BTreeMap::new();
    for fault in faults.iter().filter(|f| f.kind == FaultKind::Storage) {
        let category_index = plan
            .calculations()
            .get(fault.spec_index)
            .and_then(|calc| calc.categories.iter().position(|c| c.name == fault.category));
        match category_index {
            Some(category_index) => {
                retry
                    .entry(fault.sample)
                    .or_default()
                    .insert((fault.spec_index, category_index));
            }
            None => warn!(
                sample = fault.sample,
                spec_index = fault.spec_index,
                category = %fault.category,
                "Storage fault does not match any planned unit"
            ),
        }
    }
    retry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategoryDefinitions;
    use crate::config::CalculationSpec;
    use crate::metric::MetricResult;
    use crate::registry::MetricRegistry;
    use std::time::Duration;

    fn plan() -> Plan {
        Plan::build(
            &[CalculationSpec::new("missing-rate", ["pose"])],
            &CategoryDefinitions::new(),
            &MetricRegistry::builtin(),
            vec![],
        )
        .expect("plan")
    }

    fn outcome(index: usize, rate: Option<f64>) -> SampleOutcome {
        let result = match rate {
            Some(rate) => Ok(MetricResult::new("missing-rate").with_value("missing_rate", rate)),
            None => Err(UnitFault::DataUnavailable("gone".to_string())),
        };
        SampleOutcome {
            index,
            units: vec![UnitOutcome {
                spec_index: 0,
                category_index: 0,
                result,
                elapsed: Duration::ZERO,
            }],
        }
    }

    #[test]
    fn test_reorder_buffer_releases_in_order() {
        let mut buffer = ReorderBuffer::new(vec![1, 2, 4]);
        buffer.insert(outcome(4, Some(0.0)));
        buffer.insert(outcome(2, Some(0.0)));
        assert!(buffer.pop_ready().is_none());
        assert_eq!(buffer.len(), 2);

        buffer.insert(outcome(1, Some(0.0)));
        let released: Vec<usize> = std::iter::from_fn(|| buffer.pop_ready())
            .map(|o| o.index)
            .collect();
        assert_eq!(released, vec![1, 2, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fault_reduces_count_by_one() {
        let plan = plan();
        let metrics = MetricsCollector::new();
        let mut state = RunState::new(&plan);
        state.commit(&plan, outcome(0, Some(0.0)), &metrics);
        state.commit(&plan, outcome(1, None), &metrics);
        state.commit(&plan, outcome(2, Some(0.5)), &metrics);

        let reports = state.summarize(&plan);
        assert_eq!(reports[0].categories[0].summary.count, 2);
        assert_eq!(state.counters().units_faulted, 1);
        assert_eq!(state.counters().faulted_samples, 1);
        assert_eq!(state.faults()[0].sample, 1);
        assert_eq!(state.completed_count(), 3);
    }

    #[test]
    fn test_checkpoint_restore_continues_identically() {
        let plan = plan();
        let metrics = MetricsCollector::new();

        let mut full = RunState::new(&plan);
        let mut partial = RunState::new(&plan);
        for i in 0..3 {
            full.commit(&plan, outcome(i, Some(i as f64 / 7.0)), &metrics);
            partial.commit(&plan, outcome(i, Some(i as f64 / 7.0)), &metrics);
        }

        let checkpoint = partial.to_checkpoint(&plan, "memory:x", 5).expect("checkpoint");
        let text = serde_json::to_string(&checkpoint).expect("encode");
        let decoded: Checkpoint = serde_json::from_str(&text).expect("decode");
        let mut resumed = RunState::restore(&plan, decoded).expect("restore");
        assert_eq!(resumed.resumed_samples(), 3);
        assert_eq!(resumed.pending(5), vec![3, 4]);

        for i in 3..5 {
            full.commit(&plan, outcome(i, Some(i as f64 / 7.0)), &metrics);
            resumed.commit(&plan, outcome(i, Some(i as f64 / 7.0)), &metrics);
        }
        assert_eq!(resumed.summarize(&plan), full.summarize(&plan));
    }

    #[test]
    fn test_resume_retries_only_storage_faulted_units() {
        let plan = Plan::build(
            &[CalculationSpec::new("missing-rate", ["pose", "face"])],
            &CategoryDefinitions::new(),
            &MetricRegistry::builtin(),
            vec![],
        )
        .expect("plan");
        let metrics = MetricsCollector::new();
        let unit = |category_index: usize, result: Result<MetricResult, UnitFault>| UnitOutcome {
            spec_index: 0,
            category_index,
            result,
            elapsed: Duration::ZERO,
        };
        let ok = |rate: f64| Ok(MetricResult::new("missing-rate").with_value("missing_rate", rate));

        let mut first = RunState::new(&plan);
        first.commit(
            &plan,
            SampleOutcome {
                index: 0,
                units: vec![unit(0, ok(0.0)), unit(1, ok(0.0))],
            },
            &metrics,
        );
        first.commit(
            &plan,
            SampleOutcome {
                index: 1,
                units: vec![
                    unit(0, ok(0.5)),
                    unit(1, Err(UnitFault::Storage("read failed".to_string()))),
                ],
            },
            &metrics,
        );
        assert_eq!(first.counters().faulted_samples, 1);

        let checkpoint = first.to_checkpoint(&plan, "memory:x", 3).expect("checkpoint");
        let mut resumed = RunState::restore(&plan, checkpoint).expect("restore");
        assert_eq!(resumed.pending(3), vec![1, 2]);
        assert_eq!(resumed.retry_count(), 1);

        // The retry carries both units; only the faulted one is applied.
        resumed.commit(
            &plan,
            SampleOutcome {
                index: 1,
                units: vec![unit(0, ok(0.5)), unit(1, ok(0.25))],
            },
            &metrics,
        );

        let reports = resumed.summarize(&plan);
        assert_eq!(reports[0].categories[0].summary.count, 2);
        assert_eq!(reports[0].categories[1].summary.count, 2);
        assert!(resumed.faults().is_empty());
        assert_eq!(resumed.counters().faulted_samples, 0);
        assert_eq!(resumed.counters().units_faulted, 0);
        assert_eq!(resumed.counters().units_ok, 4);
        assert_eq!(resumed.retry_count(), 0);
        assert_eq!(resumed.pending(3), vec![2]);
    }

    #[test]
    fn test_repeated_storage_fault_stays_recorded_once() {
        let plan = plan();
        let metrics = MetricsCollector::new();
        let storage = |index: usize| SampleOutcome {
            index,
            units: vec![UnitOutcome {
                spec_index: 0,
                category_index: 0,
                result: Err(UnitFault::Storage("read failed".to_string())),
                elapsed: Duration::ZERO,
            }],
        };

        let mut first = RunState::new(&plan);
        first.commit(&plan, storage(0), &metrics);
        let checkpoint = first.to_checkpoint(&plan, "memory:x", 1).expect("checkpoint");

        let mut resumed = RunState::restore(&plan, checkpoint).expect("restore");
        resumed.commit(&plan, storage(0), &metrics);
        assert_eq!(resumed.faults().len(), 1);
        assert_eq!(resumed.counters().units_faulted, 1);
        assert_eq!(resumed.counters().faulted_samples, 1);

        let again = resumed.to_checkpoint(&plan, "memory:x", 1).expect("checkpoint");
        let resumed = RunState::restore(&plan, again).expect("restore");
        assert_eq!(resumed.pending(1), vec![0]);
    }

    #[test]
    fn test_restore_rejects_foreign_buckets() {
        let plan = plan();
        let mut checkpoint = RunState::new(&plan)
            .to_checkpoint(&plan, "memory:x", 1)
            .expect("checkpoint");
        if let Some(bucket) = checkpoint.buckets.get_mut("0/missing-rate/pose") {
            bucket.aggregator = "quantiles".to_string();
        }
        assert!(matches!(
            RunState::restore(&plan, checkpoint),
            Err(CheckpointError::Mismatch(_))
        ));
    }
}
