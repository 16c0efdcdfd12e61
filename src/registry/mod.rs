//! Metric registry.
//!
//! This module provides functionality for:
//! - Discovering metric registrations and validating their capability surface
//! - Excluding (and remembering) candidates that fail validation
//! - Creating metric instances from manifest parameters

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, PluginValidationError};
use crate::metric::{builtin, Metric, MetricBuildError, MetricParams};

/// Builds a metric from its manifest parameters.
pub type MetricFactory =
    Arc<dyn Fn(&MetricParams) -> Result<Box<dyn Metric>, MetricBuildError> + Send + Sync>;

/// Pattern every metric identifier must match.
const IDENTIFIER_PATTERN: &str = "^[a-z][a-z0-9_-]*$";

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).expect("valid identifier pattern"))
}

/// A metric offered to the registry.
#[derive(Clone)]
pub struct MetricRegistration {
    /// Identifier used in manifests.
    pub id: String,
    /// One-line description shown by `list-metrics`.
    pub description: String,
    factory: MetricFactory,
}

impl MetricRegistration {
    pub fn new<F>(id: impl Into<String>, description: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&MetricParams) -> Result<Box<dyn Metric>, MetricBuildError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            factory: Arc::new(factory),
        }
    }

    /// Runs the factory.
    pub fn build(&self, params: &MetricParams) -> Result<Box<dyn Metric>, MetricBuildError> {
        (self.factory)(params)
    }
}

impl fmt::Debug for MetricRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricRegistration")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Immutable set of validated metric registrations keyed by identifier.
#[derive(Debug, Default, Clone)]
pub struct MetricRegistry {
    entries: BTreeMap<String, MetricRegistration>,
    rejected: Vec<PluginValidationError>,
}

impl MetricRegistry {
    /// Builds a registry from candidate registrations.
    ///
    /// Candidates failing [`MetricRegistry::validate`] are logged and
    /// excluded; discovery itself never fails.
    pub fn discover<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = MetricRegistration>,
    {
        let mut registry = Self::default();

        for candidate in candidates {
            match registry.validate(&candidate) {
                Ok(()) => {
                    debug!(metric = %candidate.id, "Registered metric");
                    registry.entries.insert(candidate.id.clone(), candidate);
                }
                Err(e) => {
                    warn!(metric = %candidate.id, error = %e, "Excluding metric registration");
                    registry.rejected.push(e);
                }
            }
        }

        info!(
            registered = registry.entries.len(),
            rejected = registry.rejected.len(),
            "Metric registry ready"
        );
        registry
    }

    /// Registry containing only the built-in metrics.
    pub fn builtin() -> Self {
        Self::discover(builtin::registrations())
    }

    /// Built-in metrics followed by `extra` registrations.
    pub fn with_builtins<I>(extra: I) -> Self
    where
        I: IntoIterator<Item = MetricRegistration>,
    {
        Self::discover(builtin::registrations().into_iter().chain(extra))
    }

    /// Structural check of a candidate against this registry.
    pub fn validate(&self, candidate: &MetricRegistration) -> Result<(), PluginValidationError> {
        if !identifier_regex().is_match(&candidate.id) {
            return Err(PluginValidationError::InvalidIdentifier(candidate.id.clone()));
        }
        if candidate.description.trim().is_empty() {
            return Err(PluginValidationError::MissingDescription(candidate.id.clone()));
        }
        if self.entries.contains_key(&candidate.id) {
            return Err(PluginValidationError::Duplicate(candidate.id.clone()));
        }
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn describe(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(|r| r.description.as_str())
    }

    pub fn registrations(&self) -> impl Iterator<Item = &MetricRegistration> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates excluded during discovery.
    pub fn rejected(&self) -> &[PluginValidationError] {
        &self.rejected
    }

    /// Creates a metric instance for one calculation.
    ///
    /// # Errors
    ///
    /// - `UnknownMetric` if `id` is not registered
    /// - `InvalidParameters` if the factory rejects `params`
    /// - `MetricIdMismatch` if the built metric reports a different id
    pub fn create(&self, id: &str, params: &MetricParams) -> Result<Box<dyn Metric>, ConfigError> {
        let registration = self.entries.get(id).ok_or_else(|| ConfigError::UnknownMetric {
            id: id.to_string(),
            available: self.ids().collect::<Vec<_>>().join(", "),
        })?;

        let metric = registration
            .build(params)
            .map_err(|e| ConfigError::InvalidParameters {
                metric: id.to_string(),
                reason: e.0,
            })?;

        if metric.id() != id {
            return Err(ConfigError::MetricIdMismatch {
                expected: id.to_string(),
                actual: metric.id().to_string(),
            });
        }
        Ok(metric)
    }
}
