//! Execution options for a calculation run.
//!
//! Options are layered: built-in defaults, then the manifest `execution`
//! section, then `LANDMARK_QC_*` environment variables, then CLI flags.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "LANDMARK_QC_WORKERS";
/// Environment variable overriding the checkpoint interval.
pub const ENV_CHECKPOINT_INTERVAL: &str = "LANDMARK_QC_CHECKPOINT_INTERVAL";
/// Environment variable overriding the reorder window.
pub const ENV_REORDER_WINDOW: &str = "LANDMARK_QC_REORDER_WINDOW";
/// Environment variable overriding the source priority (comma separated).
pub const ENV_SOURCE_PRIORITY: &str = "LANDMARK_QC_SOURCE_PRIORITY";

const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// Samples that may be in flight per worker before dispatch waits for commits.
const WINDOW_PER_WORKER: usize = 4;

/// The `execution` section of a manifest. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_priority: Option<Vec<String>>,
}

/// Resolved execution options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOptions {
    /// Number of worker tasks evaluating samples.
    pub workers: usize,
    /// Commits between two periodic checkpoints.
    pub checkpoint_interval: usize,
    /// Maximum samples dispatched but not yet committed.
    /// `None` means `4 × workers`.
    pub reorder_window: Option<usize>,
    /// Sources preferred, in order, when a bare leaf matches several arrays.
    pub source_priority: Vec<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            reorder_window: None,
            source_priority: Vec::new(),
        }
    }
}

/// Number of available CPUs, or 1 when it cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `LANDMARK_QC_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `LANDMARK_QC_WORKERS`: worker count (default: available CPUs)
    /// - `LANDMARK_QC_CHECKPOINT_INTERVAL`: commits between checkpoints (default: 100)
    /// - `LANDMARK_QC_REORDER_WINDOW`: in-flight sample bound (default: 4 × workers)
    /// - `LANDMARK_QC_SOURCE_PRIORITY`: comma-separated source names
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, then validates.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_WORKERS) {
            self.workers = parse_env_value(&val, ENV_WORKERS)?;
        }

        if let Some(val) = lookup(ENV_CHECKPOINT_INTERVAL) {
            self.checkpoint_interval = parse_env_value(&val, ENV_CHECKPOINT_INTERVAL)?;
        }

        if let Some(val) = lookup(ENV_REORDER_WINDOW) {
            self.reorder_window = Some(parse_env_value(&val, ENV_REORDER_WINDOW)?);
        }

        if let Some(val) = lookup(ENV_SOURCE_PRIORITY) {
            self.source_priority = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        self.validate()?;
        Ok(self)
    }

    /// Applies the fields set in a manifest `execution` section.
    pub fn with_section(mut self, section: &ExecutionSection) -> Self {
        if let Some(workers) = section.workers {
            self.workers = workers;
        }
        if let Some(interval) = section.checkpoint_interval {
            self.checkpoint_interval = interval;
        }
        if let Some(window) = section.reorder_window {
            self.reorder_window = Some(window);
        }
        if let Some(priority) = &section.source_priority {
            self.source_priority = priority.clone();
        }
        self
    }

    /// Validates the option values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidOption` if any value is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(invalid("workers", "must be greater than 0"));
        }

        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval", "must be greater than 0"));
        }

        if self.reorder_window == Some(0) {
            return Err(invalid("reorder_window", "must be greater than 0"));
        }

        Ok(())
    }

    /// Reorder window after applying the `4 × workers` default.
    pub fn effective_reorder_window(&self) -> usize {
        self.reorder_window
            .unwrap_or_else(|| self.workers.saturating_mul(WINDOW_PER_WORKER))
            .max(1)
    }

    /// Builder method to set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Builder method to set the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Builder method to set the reorder window.
    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = Some(window);
        self
    }

    /// Builder method to set the source priority.
    pub fn with_source_priority<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_priority = sources.into_iter().map(Into::into).collect();
        self
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidOption {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidOption {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_options() {
        let options = ExecutionOptions::default();
        assert!(options.workers >= 1);
        assert_eq!(options.checkpoint_interval, 100);
        assert_eq!(options.reorder_window, None);
        assert_eq!(options.effective_reorder_window(), options.workers * 4);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_layering_order() {
        let section = ExecutionSection {
            workers: Some(2),
            checkpoint_interval: Some(10),
            reorder_window: None,
            source_priority: Some(vec!["engineB".to_string()]),
        };
        let options = ExecutionOptions::default()
            .with_section(&section)
            .with_env_overrides(lookup(&[
                (ENV_CHECKPOINT_INTERVAL, "25"),
                (ENV_SOURCE_PRIORITY, "engineA, engineB"),
            ]))
            .expect("valid env")
            .with_workers(8);

        assert_eq!(options.workers, 8);
        assert_eq!(options.checkpoint_interval, 25);
        assert_eq!(options.source_priority, vec!["engineA", "engineB"]);
        assert_eq!(options.effective_reorder_window(), 32);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = ExecutionOptions::default()
            .with_env_overrides(lookup(&[(ENV_WORKERS, "many")]))
            .expect_err("unparsable");
        assert!(err.to_string().contains(ENV_WORKERS));
    }

    #[test]
    fn test_validation_rejects_zero() {
        let err = ExecutionOptions::default()
            .with_workers(0)
            .validate()
            .expect_err("zero workers");
        assert!(err.to_string().contains("workers"));

        assert!(ExecutionOptions::default()
            .with_reorder_window(0)
            .validate()
            .is_err());
        assert!(ExecutionOptions::default()
            .with_checkpoint_interval(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_section_rejects_unknown_keys() {
        let parsed: Result<ExecutionSection, _> = serde_yaml::from_str("wokers: 3\n");
        assert!(parsed.is_err());
    }
}
