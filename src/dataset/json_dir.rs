//! Directory-of-JSON dataset.
//!
//! Each `*.json` file directly inside the directory is one sample; samples
//! are indexed by sorted file name. A sample document maps dotted array
//! names to arrays:
//!
//! ```json
//! {
//!   "engineA.pose": { "shape": [10, 5, 3], "data": [0.1, 0.2, null, ...] },
//!   "engineB.pose": { "shape": [10, 5, 3], "data": [...] }
//! }
//! ```
//!
//! `null` entries are missing values and load as `NaN`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::DatasetError;

use super::{Dataset, SampleArrays};

/// Serialized form of one array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonArray {
    pub shape: Vec<usize>,
    pub data: Vec<Option<f64>>,
}

impl JsonArray {
    /// Converts to an ndarray, mapping `null` to `NaN`.
    pub fn into_array(self, name: &str) -> Result<ArrayD<f64>, DatasetError> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(DatasetError::InvalidArray {
                name: name.to_string(),
                reason: format!(
                    "shape {:?} needs {} values, found {}",
                    self.shape,
                    expected,
                    self.data.len()
                ),
            });
        }
        let values: Vec<f64> = self
            .data
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), values).map_err(|e| {
            DatasetError::InvalidArray {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Converts from an ndarray, mapping non-finite values to `null`.
    pub fn from_array(array: &ArrayD<f64>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            data: array
                .iter()
                .map(|v| if v.is_finite() { Some(*v) } else { None })
                .collect(),
        }
    }
}

/// Dataset backed by a directory of JSON sample documents.
#[derive(Debug, Clone)]
pub struct JsonDirDataset {
    root: PathBuf,
    files: Vec<PathBuf>,
    identity: String,
}

impl JsonDirDataset {
    /// Scans `root` for sample documents.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError::Open` if `root` is not a readable directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DatasetError::Open(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| DatasetError::Open(e.to_string()))?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                files.push(path.to_path_buf());
            }
        }
        files.sort();

        let mut hasher = Sha256::new();
        for file in &files {
            if let Some(name) = file.file_name() {
                hasher.update(name.to_string_lossy().as_bytes());
                hasher.update(b"\n");
            }
        }
        let digest = hex::encode(hasher.finalize());
        let identity = format!("json-dir:{}#{}", root.display(), &digest[..16]);

        info!(root = %root.display(), samples = files.len(), "Opened JSON dataset");

        Ok(Self {
            root,
            files,
            identity,
        })
    }

    /// Root directory of the dataset.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes one sample document into `dir`.
    ///
    /// Returns the path of the written file.
    pub fn write_sample(
        dir: impl AsRef<Path>,
        file_stem: &str,
        arrays: &BTreeMap<String, ArrayD<f64>>,
    ) -> Result<PathBuf, DatasetError> {
        let document: BTreeMap<&str, JsonArray> = arrays
            .iter()
            .map(|(name, array)| (name.as_str(), JsonArray::from_array(array)))
            .collect();
        let path = dir.as_ref().join(format!("{}.json", file_stem));
        fs::write(&path, serde_json::to_vec(&document)?)?;
        Ok(path)
    }

    fn parse_document(&self, index: usize) -> Result<BTreeMap<String, JsonArray>, DatasetError> {
        let path = self.files.get(index).ok_or(DatasetError::SampleOutOfRange {
            index,
            len: self.files.len(),
        })?;
        debug!(index, path = %path.display(), "Reading sample document");
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

impl Dataset for JsonDirDataset {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn len(&self) -> usize {
        self.files.len()
    }

    fn array_names(&self, index: usize) -> Result<Vec<String>, DatasetError> {
        Ok(self.parse_document(index)?.into_keys().collect())
    }

    fn load_array(&self, index: usize, name: &str) -> Result<ArrayD<f64>, DatasetError> {
        let mut document = self.parse_document(index)?;
        let raw = document
            .remove(name)
            .ok_or_else(|| DatasetError::ArrayNotFound {
                index,
                name: name.to_string(),
            })?;
        raw.into_array(name)
    }

    fn read_sample(&self, index: usize) -> Result<Option<Box<dyn SampleArrays>>, DatasetError> {
        let arrays = self.parse_document(index)?;
        Ok(Some(Box::new(SampleDocument { index, arrays })))
    }
}

/// A parsed sample document. Arrays convert on load.
struct SampleDocument {
    index: usize,
    arrays: BTreeMap<String, JsonArray>,
}

impl SampleArrays for SampleDocument {
    fn names(&self) -> Vec<String> {
        self.arrays.keys().cloned().collect()
    }

    fn load(&self, name: &str) -> Result<ArrayD<f64>, DatasetError> {
        let raw = self
            .arrays
            .get(name)
            .cloned()
            .ok_or_else(|| DatasetError::ArrayNotFound {
                index: self.index,
                name: name.to_string(),
            })?;
        raw.into_array(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Sample;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_through_directory() {
        let dir = TempDir::new().expect("tempdir");
        let mut pose = ArrayD::<f64>::zeros(IxDyn(&[2, 2, 3]));
        pose[[1, 0, 2]] = f64::NAN;

        let mut arrays = BTreeMap::new();
        arrays.insert("engineA.pose".to_string(), pose);
        JsonDirDataset::write_sample(dir.path(), "sample_000", &arrays).expect("write");
        JsonDirDataset::write_sample(dir.path(), "sample_001", &arrays).expect("write");
        fs::write(dir.path().join("README.txt"), "ignored").expect("write readme");

        let dataset = JsonDirDataset::open(dir.path()).expect("open");
        assert_eq!(dataset.len(), 2);
        assert!(dataset.identity().starts_with("json-dir:"));
        assert_eq!(dataset.array_names(1).expect("names"), vec!["engineA.pose"]);

        let loaded = dataset.load_array(0, "engineA.pose").expect("load");
        assert_eq!(loaded.shape(), &[2, 2, 3]);
        assert!(loaded[[1, 0, 2]].is_nan());
        assert_eq!(loaded.iter().filter(|v| v.is_nan()).count(), 1);
    }

    #[test]
    fn test_sample_reads_its_document_once() {
        let dir = TempDir::new().expect("tempdir");
        let mut arrays = BTreeMap::new();
        arrays.insert("engineA.pose".to_string(), ArrayD::<f64>::zeros(IxDyn(&[3, 33, 3])));
        arrays.insert("engineB.pose".to_string(), ArrayD::<f64>::ones(IxDyn(&[3, 33, 3])));
        let path = JsonDirDataset::write_sample(dir.path(), "sample_000", &arrays).expect("write");

        let dataset = JsonDirDataset::open(dir.path()).expect("open");
        let sample = Sample::open(&dataset, 0).expect("open sample");
        fs::remove_file(&path).expect("remove");

        // Every load is served from the document parsed at open.
        assert_eq!(sample.names(), &["engineA.pose", "engineB.pose"]);
        assert_eq!(sample.load("engineA.pose").expect("a").sum(), 0.0);
        assert_eq!(sample.load("engineB.pose").expect("b").sum(), 99.0 * 3.0);
        assert!(dataset.load_array(0, "engineA.pose").is_err());
    }

    #[test]
    fn test_shape_mismatch_is_invalid_array() {
        let raw = JsonArray {
            shape: vec![2, 3],
            data: vec![Some(1.0); 5],
        };
        let err = raw.into_array("engineA.pose").expect_err("mismatch");
        assert!(matches!(err, DatasetError::InvalidArray { .. }));
    }

    #[test]
    fn test_open_rejects_missing_directory() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("nope");
        assert!(matches!(
            JsonDirDataset::open(&missing),
            Err(DatasetError::Open(_))
        ));
    }
}
