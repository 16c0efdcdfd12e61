//! Leaf selection and keypoint-axis concatenation.
//!
//! A leaf is either a bare part name (`pose`), matching every array whose
//! dotted name ends in that part, or a fully qualified name
//! (`engineA.pose`), matching exactly. When several sources provide the
//! same part, the configured source priority decides; without an applicable
//! priority the lexicographically smallest name wins.

use ndarray::{concatenate, ArrayD, ArrayViewD, Axis};

use crate::error::UnitFault;

use super::Sample;

/// Axis along which leaf arrays are joined: `(frames, points, dims)`.
const KEYPOINT_AXIS: usize = 1;

/// Leaf arrays of one category joined into a single array.
#[derive(Debug, Clone)]
pub struct GatheredArray {
    /// The joined array.
    pub array: ArrayD<f64>,
    /// Concrete array names chosen for each leaf, in leaf order.
    pub sources: Vec<String>,
}

/// Splits a dotted name into `(source, part)`.
///
/// Names without a dot have an empty source.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((source, part)) => (source, part),
        None => ("", name),
    }
}

/// Picks the array name that satisfies `leaf` among `names`.
pub fn select_array_name<'n>(
    names: &'n [String],
    leaf: &str,
    priority: &[String],
) -> Option<&'n String> {
    if leaf.contains('.') {
        return names.iter().find(|name| name.as_str() == leaf);
    }

    let candidates: Vec<&String> = names
        .iter()
        .filter(|name| split_name(name).1 == leaf)
        .collect();

    for source in priority {
        if let Some(found) = candidates
            .iter()
            .find(|name| split_name(name).0 == source.as_str())
        {
            return Some(*found);
        }
    }

    candidates.into_iter().min()
}

/// Loads and concatenates the arrays for `leaves` from `sample`.
///
/// # Errors
///
/// - `DataUnavailable` if the category has no leaves or a leaf matches nothing
/// - `Storage` if an array cannot be loaded
/// - `PreconditionViolation` if leaf arrays cannot be joined on the keypoint axis
pub fn gather_leaves(
    sample: &Sample<'_>,
    leaves: &[String],
    priority: &[String],
) -> Result<GatheredArray, UnitFault> {
    if leaves.is_empty() {
        return Err(UnitFault::DataUnavailable(
            "category resolves to no leaves".to_string(),
        ));
    }

    let mut arrays = Vec::with_capacity(leaves.len());
    let mut sources = Vec::with_capacity(leaves.len());

    for leaf in leaves {
        let name = select_array_name(sample.names(), leaf, priority).ok_or_else(|| {
            UnitFault::DataUnavailable(format!(
                "no array satisfies leaf '{}' in sample {}",
                leaf,
                sample.index()
            ))
        })?;
        arrays.push(sample.load(name).map_err(UnitFault::from)?);
        sources.push(name.clone());
    }

    if arrays.len() == 1 {
        let array = arrays.pop().ok_or_else(|| {
            UnitFault::DataUnavailable("category resolves to no leaves".to_string())
        })?;
        return Ok(GatheredArray { array, sources });
    }

    if let Some(first) = arrays.first() {
        if first.ndim() <= KEYPOINT_AXIS {
            return Err(UnitFault::PreconditionViolation(format!(
                "array '{}' has {} dimension(s), need at least {} to join on the keypoint axis",
                sources[0],
                first.ndim(),
                KEYPOINT_AXIS + 1
            )));
        }
    }

    let views: Vec<ArrayViewD<'_, f64>> = arrays.iter().map(|a| a.view()).collect();
    let array = concatenate(Axis(KEYPOINT_AXIS), &views).map_err(|e| {
        let shapes: Vec<String> = arrays.iter().map(|a| format!("{:?}", a.shape())).collect();
        UnitFault::PreconditionViolation(format!(
            "cannot join {} on the keypoint axis: {}",
            shapes.join(" + "),
            e
        ))
    })?;

    Ok(GatheredArray { array, sources })
}
