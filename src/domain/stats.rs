//! Summary counts over a set of workflows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::template::TemplateCatalog;
use super::workflow::Phase;

/// Dashboard view: Failed and Error share the `failed` bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    /// Every workflow observed, including ones outside the named buckets
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

impl WorkflowStatistics {
    /// Count one observed phase
    pub fn record(&mut self, phase: Phase) {
        self.total += 1;
        match phase {
            Phase::Running => self.running += 1,
            Phase::Succeeded => self.succeeded += 1,
            Phase::Failed | Phase::Error => self.failed += 1,
            Phase::Pending => self.pending += 1,
            Phase::Unknown => {}
        }
    }

    /// Count a workflow whose phase could not be determined at all
    pub fn record_unclassified(&mut self) {
        self.total += 1;
    }

    pub fn from_phases(phases: impl IntoIterator<Item = Phase>) -> Self {
        let mut stats = Self::default();
        for phase in phases {
            stats.record(phase);
        }
        stats
    }

    /// Sum of the named buckets (never more than `total`)
    pub fn classified(&self) -> usize {
        self.running + self.succeeded + self.failed + self.pending
    }
}

/// Detail view: one count per distinct phase
pub type PhaseCounts = BTreeMap<Phase, usize>;

/// Namespace summary assembled from several independent lookups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub namespace: String,
    pub statistics: WorkflowStatistics,
    /// Names of workflows that are pending or running
    pub active: Vec<String>,
    pub templates: TemplateCatalog,
    /// Lookups that failed and were replaced by empty results
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_and_error_share_bucket() {
        let stats = WorkflowStatistics::from_phases([Phase::Failed, Phase::Error]);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total, 2);
    }

    #[test]
    fn test_unknown_only_counts_in_total() {
        let stats = WorkflowStatistics::from_phases([
            Phase::Running,
            Phase::Unknown,
            Phase::Pending,
        ]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.classified(), 2);
    }

    #[test]
    fn test_total_never_below_classified() {
        let all = [
            Phase::Pending,
            Phase::Running,
            Phase::Succeeded,
            Phase::Failed,
            Phase::Error,
            Phase::Unknown,
        ];
        for n in 0..all.len() {
            let stats = WorkflowStatistics::from_phases(all.iter().copied().cycle().take(n * 7));
            assert!(stats.total >= stats.classified());
        }

        let named = WorkflowStatistics::from_phases(all[..5].iter().copied());
        assert_eq!(named.total, named.classified());
    }
}
