//! Run report: metadata, per-category summaries and recorded faults.

mod writer;

pub use writer::{ReportError, ReportFormat};

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Summary;
use crate::error::FaultKind;
use crate::metric::MetricParams;

/// Metadata about one calculation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the report was produced.
    pub generated_at: DateTime<Utc>,
    /// Identity of the dataset.
    pub dataset: String,
    /// Samples in the dataset.
    pub total_samples: usize,
    /// Samples committed, including ones restored from a checkpoint.
    pub processed_samples: usize,
    /// Samples restored from a checkpoint instead of evaluated in this run.
    pub resumed_samples: usize,
    /// Samples with at least one faulted unit.
    pub faulted_samples: usize,
    /// Units committed (successful or faulted).
    pub units_evaluated: u64,
    /// Units that recorded a fault.
    pub units_faulted: u64,
    /// Worker tasks used by this run.
    pub workers: usize,
    /// Wall-clock duration of this run.
    pub duration_secs: f64,
    /// Set when the run stopped before every sample was committed.
    pub interrupted: bool,
    /// Checkpoint written by this run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<PathBuf>,
}

/// Summary of one resolved category within a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub name: String,
    pub leaves: Vec<String>,
    pub summary: Summary,
}

/// Results of one calculation spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationReport {
    /// Position of the calculation in the manifest.
    pub spec_index: usize,
    pub metric: String,
    #[serde(default, skip_serializing_if = "MetricParams::is_empty")]
    pub params: MetricParams,
    /// Name of the aggregator that produced the summaries.
    pub aggregator: String,
    pub categories: Vec<CategoryReport>,
}

/// A recorded per-unit fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub sample: usize,
    pub spec_index: usize,
    pub metric: String,
    pub category: String,
    pub kind: FaultKind,
    pub message: String,
}

/// Final output of a calculation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: RunMetadata,
    pub calculations: Vec<CalculationReport>,
    pub faults: Vec<FaultRecord>,
}

impl Report {
    /// Looks up a category summary by calculation index and category name.
    pub fn category(&self, spec_index: usize, name: &str) -> Option<&CategoryReport> {
        self.calculations
            .iter()
            .find(|c| c.spec_index == spec_index)?
            .categories
            .iter()
            .find(|c| c.name == name)
    }

    /// Faults of a given kind.
    pub fn faults_of(&self, kind: FaultKind) -> impl Iterator<Item = &FaultRecord> {
        self.faults.iter().filter(move |f| f.kind == kind)
    }

    /// True when both reports carry identical summaries and faults,
    /// ignoring run-specific metadata.
    pub fn same_results(&self, other: &Report) -> bool {
        self.calculations == other.calculations && self.faults == other.faults
    }

    /// Human-readable summary for the console.
    pub fn summary(&self) -> String {
        let meta = &self.metadata;
        let mut out = String::new();

        let _ = writeln!(out, "Run {} on {}", meta.run_id, meta.dataset);
        let _ = writeln!(
            out,
            "  samples: {}/{} processed ({} resumed, {} with faults)",
            meta.processed_samples, meta.total_samples, meta.resumed_samples, meta.faulted_samples
        );
        let _ = writeln!(
            out,
            "  units:   {} evaluated, {} faulted",
            meta.units_evaluated, meta.units_faulted
        );
        let _ = writeln!(
            out,
            "  workers: {}, duration {:.2}s{}",
            meta.workers,
            meta.duration_secs,
            if meta.interrupted { ", INTERRUPTED" } else { "" }
        );

        for calc in &self.calculations {
            let _ = writeln!(
                out,
                "\n[{}] {} ({})",
                calc.spec_index, calc.metric, calc.aggregator
            );
            for category in &calc.categories {
                let _ = writeln!(
                    out,
                    "  {} (n={}, leaves: {})",
                    category.name,
                    category.summary.count,
                    category.leaves.join(", ")
                );
                for (key, value) in &category.summary.statistics {
                    let _ = writeln!(out, "    {:<32} {:.6}", key, value);
                }
            }
        }

        if !self.faults.is_empty() {
            let mut by_kind = std::collections::BTreeMap::new();
            for fault in &self.faults {
                *by_kind.entry(fault.kind).or_insert(0usize) += 1;
            }
            let _ = writeln!(out, "\nFaults:");
            for (kind, count) in by_kind {
                let _ = writeln!(out, "  {:<24} {}", kind, count);
            }
        }

        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    pub(crate) fn sample_report() -> Report {
        let mut statistics = BTreeMap::new();
        statistics.insert("missing_rate.mean".to_string(), 0.1 / 3.0);
        statistics.insert("missing_rate.count".to_string(), 3.0);

        Report {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                generated_at: Utc::now(),
                dataset: "memory:test".to_string(),
                total_samples: 4,
                processed_samples: 4,
                resumed_samples: 0,
                faulted_samples: 1,
                units_evaluated: 4,
                units_faulted: 1,
                workers: 2,
                duration_secs: 0.01,
                interrupted: false,
                checkpoint: None,
            },
            calculations: vec![CalculationReport {
                spec_index: 0,
                metric: "missing-rate".to_string(),
                params: MetricParams::new(),
                aggregator: "welford".to_string(),
                categories: vec![CategoryReport {
                    name: "pose".to_string(),
                    leaves: vec!["pose".to_string()],
                    summary: Summary {
                        count: 3,
                        statistics,
                    },
                }],
            }],
            faults: vec![FaultRecord {
                sample: 2,
                spec_index: 0,
                metric: "missing-rate".to_string(),
                category: "pose".to_string(),
                kind: FaultKind::DataUnavailable,
                message: "no array satisfies leaf 'pose' in sample 2".to_string(),
            }],
        }
    }

    #[test]
    fn test_lookup_helpers() {
        let report = sample_report();
        let pose = report.category(0, "pose").expect("pose summary");
        assert_eq!(pose.summary.count, 3);
        assert!(report.category(1, "pose").is_none());
        assert_eq!(report.faults_of(FaultKind::DataUnavailable).count(), 1);
        assert_eq!(report.faults_of(FaultKind::Numeric).count(), 0);
    }

    #[test]
    fn test_same_results_ignores_metadata() {
        let a = sample_report();
        let mut b = sample_report();
        assert_ne!(a.metadata.run_id, b.metadata.run_id);
        assert!(a.same_results(&b));

        b.faults.clear();
        assert!(!a.same_results(&b));
    }

    #[test]
    fn test_console_summary() {
        let text = sample_report().summary();
        assert!(text.contains("4/4 processed"));
        assert!(text.contains("missing_rate.mean"));
        assert!(text.contains("data_unavailable"));
        assert!(!text.contains("INTERRUPTED"));
    }
}
