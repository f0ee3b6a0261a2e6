//! Phase statistics over a namespace's workflows.
//!
//! Every call lists and reduces afresh; nothing is cached.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::adapters::{RawResource, ResourceClient, ResourceKind};
use crate::core::transform::workflow_from_raw;
use crate::domain::{Phase, PhaseCounts, WorkflowStatistics};
use crate::error::Result;

/// Reduces workflow listings to phase counts
pub struct StatisticsAggregator {
    resources: Arc<dyn ResourceClient>,
}

impl StatisticsAggregator {
    pub fn new(resources: Arc<dyn ResourceClient>) -> Self {
        Self { resources }
    }

    /// Dashboard counts; Failed and Error are reported together
    #[instrument(skip(self))]
    pub async fn statistics(&self, namespace: &str) -> Result<WorkflowStatistics> {
        let items = self.list(namespace).await?;
        let stats = summarize(&items);
        debug!(
            total = stats.total,
            classified = stats.classified(),
            "Workflow statistics computed"
        );
        Ok(stats)
    }

    /// One count per distinct phase, Unknown included
    #[instrument(skip(self))]
    pub async fn phase_counts(&self, namespace: &str) -> Result<PhaseCounts> {
        let items = self.list(namespace).await?;
        let mut counts = PhaseCounts::new();
        for phase in phases(&items) {
            *counts.entry(phase.unwrap_or(Phase::Unknown)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<RawResource>> {
        self.resources
            .list(&ResourceKind::WORKFLOW, namespace, None)
            .await
    }
}

/// Phase of each listed workflow; `None` where the document was unreadable
fn phases(items: &[RawResource]) -> impl Iterator<Item = Option<Phase>> + '_ {
    items.iter().map(|raw| match workflow_from_raw(raw) {
        Ok(wf) => {
            if wf.phase() == Phase::Unknown {
                debug!(workflow = %wf.name(), "Workflow phase outside the named set");
            }
            Some(wf.phase())
        }
        Err(err) => {
            warn!(error = %err, "Skipping unreadable workflow in statistics");
            None
        }
    })
}

/// Reduce raw workflow documents to dashboard counts
pub fn summarize(items: &[RawResource]) -> WorkflowStatistics {
    let mut stats = WorkflowStatistics::default();
    for phase in phases(items) {
        match phase {
            Some(phase) => stats.record(phase),
            None => stats.record_unclassified(),
        }
    }
    stats
}
