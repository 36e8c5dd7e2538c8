//! Per-group output metrics.
//!
//! One [`GroupMetric`] row is produced for every group that received at least one record and
//! written as TSV with [`writer::write_metrics`].

pub mod writer;

use serde::{Deserialize, Serialize};

use crate::writer_pool::GroupReport;

pub use writer::write_metrics;

/// Records delivered to one output group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetric {
    /// Group label (the output file stem).
    pub group: String,
    /// Records accepted for the group.
    pub records: u64,
    /// Records discarded after the group's output failed.
    pub dropped: u64,
    /// Whether the group's output is incomplete.
    pub failed: bool,
}

impl From<&GroupReport> for GroupMetric {
    fn from(report: &GroupReport) -> Self {
        Self {
            group: report.group.label().to_string(),
            records: report.records,
            dropped: report.dropped,
            failed: report.is_failed(),
        }
    }
}

impl GroupMetric {
    /// Builds one row per report, keeping the report order.
    #[must_use]
    pub fn from_reports(reports: &[GroupReport]) -> Vec<Self> {
        reports.iter().map(Self::from).collect()
    }
}
