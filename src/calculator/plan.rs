//! Validated calculation plan.
//!
//! Built once from the manifest: categories resolved, metrics instantiated,
//! aggregation strategies chosen. Shared read-only by all workers.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::aggregate::{AggregationStrategy, AggregatorFactory};
use crate::categories::{CategoryDefinitions, CategoryResolver, ResolvedCategory};
use crate::config::CalculationSpec;
use crate::error::ConfigError;
use crate::metric::Metric;
use crate::registry::MetricRegistry;

/// One calculation spec, ready to evaluate.
pub struct PlannedCalculation {
    /// Position in the manifest.
    pub spec_index: usize,
    pub spec: CalculationSpec,
    pub metric: Arc<dyn Metric>,
    pub aggregation: AggregationStrategy,
    pub factory: Arc<dyn AggregatorFactory>,
    pub categories: Vec<ResolvedCategory>,
}

impl PlannedCalculation {
    /// Stable key of the bucket for one category: `"{spec_index}/{metric}/{category}"`.
    pub fn bucket_key(&self, category: &ResolvedCategory) -> String {
        format!("{}/{}/{}", self.spec_index, self.spec.metric, category.name)
    }
}

impl fmt::Debug for PlannedCalculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedCalculation")
            .field("spec_index", &self.spec_index)
            .field("metric", &self.spec.metric)
            .field("aggregation", &self.aggregation)
            .field("categories", &self.categories)
            .finish()
    }
}

/// All calculations of a run plus the shared leaf selection policy.
#[derive(Debug)]
pub struct Plan {
    calculations: Vec<PlannedCalculation>,
    source_priority: Vec<String>,
    fingerprint: String,
}

impl Plan {
    /// Validates and instantiates every calculation.
    ///
    /// # Errors
    ///
    /// - `Category` if any definition is cyclic, referenced or not
    /// - `UnknownMetric` / `InvalidParameters` / `MetricIdMismatch` from the registry
    /// - `Manifest` if a calculation has no categories or repeats a category name
    pub fn build(
        specs: &[CalculationSpec],
        definitions: &CategoryDefinitions,
        registry: &MetricRegistry,
        source_priority: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let resolver = CategoryResolver::new(definitions);
        resolver.validate()?;

        let mut calculations = Vec::with_capacity(specs.len());

        for (spec_index, spec) in specs.iter().enumerate() {
            let categories = resolver.resolve(&spec.categories)?;
            if categories.is_empty() {
                return Err(ConfigError::Manifest(format!(
                    "calculation {} ({}) lists no categories",
                    spec_index, spec.metric
                )));
            }

            let mut seen = BTreeSet::new();
            for category in &categories {
                if !seen.insert(category.name.as_str()) {
                    return Err(ConfigError::Manifest(format!(
                        "calculation {} ({}) lists category '{}' more than once",
                        spec_index, spec.metric, category.name
                    )));
                }
            }

            let metric: Arc<dyn Metric> = Arc::from(registry.create(&spec.metric, &spec.params)?);
            let aggregation = AggregationStrategy::select(metric.aggregation(), spec.aggregator);
            let factory = aggregation.factory();

            debug!(
                spec_index,
                metric = %spec.metric,
                aggregator = factory.name(),
                categories = categories.len(),
                "Planned calculation"
            );

            calculations.push(PlannedCalculation {
                spec_index,
                spec: spec.clone(),
                metric,
                aggregation,
                factory,
                categories,
            });
        }

        let fingerprint = fingerprint(&calculations, &source_priority);

        Ok(Self {
            calculations,
            source_priority,
            fingerprint,
        })
    }

    pub fn calculations(&self) -> &[PlannedCalculation] {
        &self.calculations
    }

    pub fn source_priority(&self) -> &[String] {
        &self.source_priority
    }

    /// Hex SHA-256 over everything that shapes the aggregation state.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Units evaluated per sample.
    pub fn unit_count(&self) -> usize {
        self.calculations.iter().map(|c| c.categories.len()).sum()
    }
}

fn fingerprint(calculations: &[PlannedCalculation], source_priority: &[String]) -> String {
    let canonical = json!({
        "calculations": calculations
            .iter()
            .map(|calc| json!({
                "metric": calc.spec.metric,
                "params": calc.spec.params,
                "aggregator": calc.factory.name(),
                "categories": calc.categories,
            }))
            .collect::<Vec<_>>(),
        "source_priority": source_priority,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatorKind;
    use crate::categories::CategorySpec;
    use crate::error::CategoryError;
    use crate::metric::MetricParams;

    fn definitions() -> CategoryDefinitions {
        CategoryDefinitions::new().define("hands", ["left_hand", "right_hand"])
    }

    #[test]
    fn test_build_resolves_and_selects() {
        let specs = vec![
            CalculationSpec::new("missing-rate", ["pose", "hands"]),
            CalculationSpec::new("missing-values", ["pose"]),
            CalculationSpec::new("jitter", ["hands"]).with_aggregator(AggregatorKind::Quantiles),
        ];
        let plan = Plan::build(&specs, &definitions(), &MetricRegistry::builtin(), vec![])
            .expect("valid plan");

        assert_eq!(plan.unit_count(), 4);
        let calcs = plan.calculations();
        assert_eq!(calcs[0].categories[1].leaves, vec!["left_hand", "right_hand"]);
        assert_eq!(calcs[0].bucket_key(&calcs[0].categories[1]), "0/missing-rate/hands");
        assert_eq!(calcs[0].factory.name(), "welford");
        assert_eq!(calcs[1].factory.name(), "ratio");
        assert_eq!(calcs[2].factory.name(), "quantiles");
    }

    #[test]
    fn test_dormant_cycle_is_fatal() {
        let defs = definitions().define("a", ["b"]).define("b", ["a"]);
        let specs = vec![CalculationSpec::new("jitter", ["pose"])];
        let err = Plan::build(&specs, &defs, &MetricRegistry::builtin(), vec![])
            .expect_err("cycle");
        assert!(matches!(
            err,
            ConfigError::Category(CategoryError::CircularReference { .. })
        ));
    }

    #[test]
    fn test_duplicate_category_name_rejected() {
        let specs = vec![CalculationSpec {
            metric: "jitter".to_string(),
            categories: vec![CategorySpec::from("pose"), CategorySpec::from("pose")],
            params: MetricParams::new(),
            aggregator: None,
        }];
        let err = Plan::build(&specs, &definitions(), &MetricRegistry::builtin(), vec![])
            .expect_err("duplicate");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_fingerprint_tracks_configuration() {
        let registry = MetricRegistry::builtin();
        let specs = vec![CalculationSpec::new("missing-rate", ["pose"])];
        let base = Plan::build(&specs, &definitions(), &registry, vec![]).expect("plan");
        let same = Plan::build(&specs, &definitions(), &registry, vec![]).expect("plan");
        assert_eq!(base.fingerprint(), same.fingerprint());
        assert_eq!(base.fingerprint().len(), 64);

        let reprioritized =
            Plan::build(&specs, &definitions(), &registry, vec!["engineA".to_string()])
                .expect("plan");
        assert_ne!(base.fingerprint(), reprioritized.fingerprint());

        let tuned = vec![CalculationSpec::new("missing-rate", ["pose"])
            .with_params(MetricParams::new().with("threshold", 0.5))];
        let tuned = Plan::build(&tuned, &definitions(), &registry, vec![]).expect("plan");
        assert_ne!(base.fingerprint(), tuned.fingerprint());
    }
}
