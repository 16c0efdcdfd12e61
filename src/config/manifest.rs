//! Calculation manifest.
//!
//! ```yaml
//! categories:
//!   hands: [left_hand, right_hand]
//! calculations:
//!   - metric: missing-rate
//!     categories: [pose, hands]
//!     params: { threshold: 0.1 }
//!   - metric: jitter
//!     categories: [{ upper: [pose, hands] }]
//!     aggregator: quantiles
//! execution:
//!   checkpoint_interval: 50
//!   source_priority: [engineA]
//! ```
//!
//! JSON documents are accepted as well since JSON is valid YAML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatorKind;
use crate::categories::{CategoryDefinitions, CategorySpec};
use crate::error::ConfigError;
use crate::metric::MetricParams;

use super::execution::ExecutionSection;

/// One calculation: a metric applied to a list of categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CalculationSpec {
    /// Registered metric identifier.
    pub metric: String,
    /// Categories the metric is evaluated on.
    pub categories: Vec<CategorySpec>,
    /// Parameters passed to the metric factory.
    #[serde(default, skip_serializing_if = "MetricParams::is_empty")]
    pub params: MetricParams,
    /// Forces an aggregator instead of the metric's own choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<AggregatorKind>,
}

impl CalculationSpec {
    pub fn new<I, C>(metric: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CategorySpec>,
    {
        Self {
            metric: metric.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            params: MetricParams::new(),
            aggregator: None,
        }
    }

    pub fn with_params(mut self, params: MetricParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorKind) -> Self {
        self.aggregator = Some(aggregator);
        self
    }
}

/// A parsed calculation manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub categories: CategoryDefinitions,
    pub calculations: Vec<CalculationSpec>,
    #[serde(default)]
    pub execution: ExecutionSection,
}

impl Manifest {
    /// Reads and parses a manifest file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parses a manifest from YAML (or JSON) text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Manifest` if the document does not parse or has
    /// no usable calculations.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let manifest: Manifest =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.calculations.is_empty() {
            return Err(ConfigError::Manifest(
                "at least one calculation is required".to_string(),
            ));
        }

        for (index, spec) in self.calculations.iter().enumerate() {
            if spec.metric.trim().is_empty() {
                return Err(ConfigError::Manifest(format!(
                    "calculation {} has an empty metric identifier",
                    index
                )));
            }
            if spec.categories.is_empty() {
                return Err(ConfigError::Manifest(format!(
                    "calculation {} ({}) lists no categories",
                    index, spec.metric
                )));
            }
        }

        Ok(())
    }
}
