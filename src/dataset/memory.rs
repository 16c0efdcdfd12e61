//! In-memory dataset.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::DatasetError;

use super::Dataset;

/// Dataset whose arrays live in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    identity: String,
    samples: Vec<BTreeMap<String, ArrayD<f64>>>,
}

impl InMemoryDataset {
    /// Creates an empty dataset with the given identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            samples: Vec::new(),
        }
    }

    /// Appends a sample and returns its index.
    pub fn push_sample<I, S>(&mut self, arrays: I) -> usize
    where
        I: IntoIterator<Item = (S, ArrayD<f64>)>,
        S: Into<String>,
    {
        self.samples
            .push(arrays.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self.samples.len() - 1
    }

    /// Builder form of [`push_sample`](Self::push_sample).
    pub fn with_sample<I, S>(mut self, arrays: I) -> Self
    where
        I: IntoIterator<Item = (S, ArrayD<f64>)>,
        S: Into<String>,
    {
        self.push_sample(arrays);
        self
    }

    fn sample(&self, index: usize) -> Result<&BTreeMap<String, ArrayD<f64>>, DatasetError> {
        self.samples
            .get(index)
            .ok_or(DatasetError::SampleOutOfRange {
                index,
                len: self.samples.len(),
            })
    }
}

impl Dataset for InMemoryDataset {
    fn identity(&self) -> String {
        format!("memory:{}", self.identity)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn array_names(&self, index: usize) -> Result<Vec<String>, DatasetError> {
        Ok(self.sample(index)?.keys().cloned().collect())
    }

    fn load_array(&self, index: usize, name: &str) -> Result<ArrayD<f64>, DatasetError> {
        self.sample(index)?
            .get(name)
            .cloned()
            .ok_or_else(|| DatasetError::ArrayNotFound {
                index,
                name: name.to_string(),
            })
    }
}
