//! Dataset boundary.
//!
//! The engine only reads from a dataset: it asks for the sample count, the
//! dotted array names of a sample (`source.part`), and loads individual
//! arrays lazily. Implementations must tolerate concurrent reads from
//! multiple worker threads.
//!
//! Adapters that store a whole sample in one document override
//! [`Dataset::read_sample`] so that a [`Sample`] is read once per open.
//!
//! Two adapters ship with the crate:
//!
//! - [`InMemoryDataset`]: arrays held in memory, mostly for tests and embedding
//! - [`JsonDirDataset`]: a directory with one JSON document per sample

mod json_dir;
mod memory;
mod selection;

pub use json_dir::{JsonArray, JsonDirDataset};
pub use memory::InMemoryDataset;
pub use selection::{gather_leaves, select_array_name, split_name, GatheredArray};

use ndarray::ArrayD;

use crate::error::DatasetError;

/// Read-only source of indexed samples.
pub trait Dataset: Send + Sync {
    /// Stable identity of the dataset, recorded in reports and checkpoints.
    fn identity(&self) -> String;

    /// Number of samples.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dotted names of all arrays available for a sample.
    fn array_names(&self, index: usize) -> Result<Vec<String>, DatasetError>;

    /// Materializes one named array. Missing values are `NaN`.
    fn load_array(&self, index: usize, name: &str) -> Result<ArrayD<f64>, DatasetError>;

    /// Reads every array of a sample in one go. `None` means the dataset
    /// serves arrays one at a time through `array_names` and `load_array`.
    fn read_sample(&self, _index: usize) -> Result<Option<Box<dyn SampleArrays>>, DatasetError> {
        Ok(None)
    }
}

/// Arrays of one sample that were read together.
pub trait SampleArrays {
    fn names(&self) -> Vec<String>;

    /// Materializes one named array. Missing values are `NaN`.
    fn load(&self, name: &str) -> Result<ArrayD<f64>, DatasetError>;
}

enum SampleSource<'a> {
    Dataset(&'a dyn Dataset),
    Read(Box<dyn SampleArrays>),
}

/// One sample of a dataset: an index plus lazy access to its arrays.
pub struct Sample<'a> {
    index: usize,
    names: Vec<String>,
    source: SampleSource<'a>,
}

impl<'a> Sample<'a> {
    /// Opens sample `index`, listing its array names.
    pub fn open(dataset: &'a dyn Dataset, index: usize) -> Result<Self, DatasetError> {
        if index >= dataset.len() {
            return Err(DatasetError::SampleOutOfRange {
                index,
                len: dataset.len(),
            });
        }
        let (names, source) = match dataset.read_sample(index)? {
            Some(arrays) => (arrays.names(), SampleSource::Read(arrays)),
            None => (dataset.array_names(index)?, SampleSource::Dataset(dataset)),
        };
        Ok(Self {
            index,
            names,
            source,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Dotted names available in this sample.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Loads a named array.
    pub fn load(&self, name: &str) -> Result<ArrayD<f64>, DatasetError> {
        if !self.names.iter().any(|n| n == name) {
            return Err(DatasetError::ArrayNotFound {
                index: self.index,
                name: name.to_string(),
            });
        }
        match &self.source {
            SampleSource::Dataset(dataset) => dataset.load_array(self.index, name),
            SampleSource::Read(arrays) => arrays.load(name),
        }
    }
}
