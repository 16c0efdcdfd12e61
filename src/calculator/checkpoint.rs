//! Checkpoint persistence.
//!
//! A checkpoint is a versioned, pretty-printed JSON document holding
//! everything needed to continue a run: completed sample indices, the
//! serialized state of every bucket, recorded faults and counters. It is
//! written to a temporary file in the target directory and renamed into
//! place, so a crash mid-write never leaves a torn checkpoint.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::aggregate::AggregateError;
use crate::report::FaultRecord;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Leading fields common to every format version.
#[derive(Deserialize)]
struct Header {
    format_version: u32,
}

/// Errors raised while reading, writing or applying a checkpoint.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported checkpoint format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Checkpoint does not match this run: {0}")]
    Mismatch(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Run counters carried across resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    /// Committed samples with at least one faulted unit.
    pub faulted_samples: usize,
    /// Units that produced a result.
    pub units_ok: u64,
    /// Units that recorded a fault.
    pub units_faulted: u64,
}

/// Serialized state of one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Factory name that produced the state.
    pub aggregator: String,
    pub state: serde_json::Value,
}

/// Everything needed to resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    /// Fingerprint of the calculation plan.
    pub fingerprint: String,
    /// Identity of the dataset.
    pub dataset: String,
    pub total_samples: usize,
    /// Completed sample indices as inclusive `[start, end]` ranges.
    #[serde(with = "index_ranges")]
    pub completed: BTreeSet<usize>,
    /// Bucket states keyed by `"{spec_index}/{metric}/{category}"`.
    pub buckets: BTreeMap<String, BucketState>,
    pub faults: Vec<FaultRecord>,
    pub counters: RunCounters,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Writes the checkpoint atomically.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let contents = serde_json::to_vec_pretty(self)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(&contents)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| CheckpointError::Io(e.error))?;

        tracing::debug!(
            path = %path.display(),
            completed = self.completed.len(),
            buckets = self.buckets.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Reads a checkpoint, returning `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let header: Header = serde_json::from_slice(&contents)?;
        if header.format_version != FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: header.format_version,
                expected: FORMAT_VERSION,
            });
        }
        Ok(Some(serde_json::from_slice(&contents)?))
    }

    /// Checks that this checkpoint was written for the same plan and dataset.
    pub fn verify(
        &self,
        fingerprint: &str,
        dataset: &str,
        total_samples: usize,
    ) -> Result<(), CheckpointError> {
        if self.fingerprint != fingerprint {
            return Err(CheckpointError::Mismatch(
                "calculation configuration changed since the checkpoint was written".to_string(),
            ));
        }
        if self.dataset != dataset {
            return Err(CheckpointError::Mismatch(format!(
                "checkpoint is for dataset '{}', not '{}'",
                self.dataset, dataset
            )));
        }
        if self.total_samples != total_samples {
            return Err(CheckpointError::Mismatch(format!(
                "checkpoint expects {} samples, dataset has {}",
                self.total_samples, total_samples
            )));
        }
        if let Some(&last) = self.completed.iter().next_back() {
            if last >= total_samples {
                return Err(CheckpointError::Mismatch(format!(
                    "completed index {} out of range",
                    last
                )));
            }
        }
        Ok(())
    }
}

/// Serializes a sorted index set as inclusive ranges.
mod index_ranges {
    use std::collections::BTreeSet;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(set: &BTreeSet<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut ranges: Vec<[usize; 2]> = Vec::new();
        for &index in set {
            match ranges.last_mut() {
                Some(range) if range[1] + 1 == index => range[1] = index,
                _ => ranges.push([index, index]),
            }
        }
        ranges.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeSet<usize>, D::Error> {
        let ranges = Vec::<[usize; 2]>::deserialize(deserializer)?;
        let mut set = BTreeSet::new();
        for [start, end] in ranges {
            if start > end {
                return Err(serde::de::Error::custom(format!(
                    "invalid range [{}, {}]",
                    start, end
                )));
            }
            set.extend(start..=end);
        }
        Ok(set)
    }
}
