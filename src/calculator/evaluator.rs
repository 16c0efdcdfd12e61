//! Per-sample evaluation of every `(calculation, category)` unit.
//!
//! Runs on the blocking pool. Never fails as a whole: every unit ends in
//! either a [`MetricResult`] or a [`UnitFault`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::categories::ResolvedCategory;
use crate::dataset::{gather_leaves, Dataset, GatheredArray, Sample};
use crate::error::UnitFault;
use crate::metric::{CategoryContext, MetricResult};

use super::plan::{Plan, PlannedCalculation};

/// Outcome of one unit.
pub type UnitResult = Result<MetricResult, UnitFault>;

/// One evaluated unit of a sample.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub spec_index: usize,
    pub category_index: usize,
    pub result: UnitResult,
    pub elapsed: Duration,
}

/// All unit outcomes of one sample, in plan order.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub index: usize,
    pub units: Vec<UnitOutcome>,
}

impl SampleOutcome {
    /// Every unit of the sample failed with the same fault.
    pub fn uniform(plan: &Plan, index: usize, fault: UnitFault) -> Self {
        let mut units = Vec::with_capacity(plan.unit_count());
        for calc in plan.calculations() {
            for category_index in 0..calc.categories.len() {
                units.push(UnitOutcome {
                    spec_index: calc.spec_index,
                    category_index,
                    result: Err(fault.clone()),
                    elapsed: Duration::ZERO,
                });
            }
        }
        Self { index, units }
    }

    pub fn has_fault(&self) -> bool {
        self.units.iter().any(|u| u.result.is_err())
    }
}

/// Evaluates every unit of sample `index`.
///
/// Leaf arrays are gathered once per distinct leaf list and shared by all
/// calculations that use it.
pub fn evaluate_sample(dataset: &dyn Dataset, plan: &Plan, index: usize) -> SampleOutcome {
    let sample = match Sample::open(dataset, index) {
        Ok(sample) => sample,
        Err(e) => return SampleOutcome::uniform(plan, index, UnitFault::from(e)),
    };

    let mut gathered: HashMap<&[String], Result<GatheredArray, UnitFault>> = HashMap::new();
    let mut units = Vec::with_capacity(plan.unit_count());

    for calc in plan.calculations() {
        for (category_index, category) in calc.categories.iter().enumerate() {
            let started = Instant::now();
            let input = gathered
                .entry(category.leaves.as_slice())
                .or_insert_with(|| gather_leaves(&sample, &category.leaves, plan.source_priority()));

            let result = match input {
                Ok(input) => evaluate_unit(calc, category, input),
                Err(fault) => Err(fault.clone()),
            };

            if let Err(fault) = &result {
                trace!(
                    sample = index,
                    metric = %calc.spec.metric,
                    category = %category.name,
                    kind = %fault.kind(),
                    "Unit fault"
                );
            }

            units.push(UnitOutcome {
                spec_index: calc.spec_index,
                category_index,
                result,
                elapsed: started.elapsed(),
            });
        }
    }

    SampleOutcome { index, units }
}

fn evaluate_unit(
    calc: &PlannedCalculation,
    category: &ResolvedCategory,
    input: &GatheredArray,
) -> UnitResult {
    let context = CategoryContext::new(
        category.name.clone(),
        category.leaves.clone(),
        input.sources.clone(),
    );
    let calculated =
        panic::catch_unwind(AssertUnwindSafe(|| calc.metric.calculate(&context, &input.array)));
    let result = match calculated {
        Ok(result) => result?,
        Err(payload) => {
            return Err(UnitFault::WorkerPanic(format!(
                "metric '{}' panicked: {}",
                calc.spec.metric,
                panic_message(payload.as_ref())
            )))
        }
    };

    if let Some(key) = result.first_non_finite() {
        return Err(UnitFault::Numeric(format!(
            "metric '{}' produced a non-finite value for '{}'",
            calc.spec.metric, key
        )));
    }
    Ok(result)
}

/// Text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
