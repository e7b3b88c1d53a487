//! Maintenance: consolidation and pruning
//!
//! A maintenance cycle turns accumulated episodic evidence into durable
//! facts, tags the evidence as consumed, and then prunes records that are
//! no longer worth keeping. Cycles are idempotent: re-running over the
//! same records re-selects the same candidates and re-tagging or
//! re-deleting is a safe no-op, so an overlapping duplicate run only
//! wastes work.

use crate::collaborators::{ConsolidationCandidate, Extractor};
use crate::config::MemoryConfig;
use crate::episodic::{EpisodicRecord, EpisodicStore};
use crate::error::MnemoResult;
use crate::facts::{FactPatch, FactStore};
use chrono::{Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What one maintenance cycle did
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    /// Episodic records eligible for consolidation this cycle
    pub candidates: usize,

    /// True when consolidation did not run (batch too small or the
    /// collaborator failed); the same candidates are retried next cycle
    pub consolidation_skipped: bool,

    /// Facts written from consolidation proposals
    pub facts_written: usize,

    /// Episodic records newly tagged as consolidated
    pub records_tagged: usize,

    /// Episodic records deleted by pruning
    pub records_pruned: usize,
}

/// Runs consolidation followed by pruning over the episodic store
pub struct MaintenanceEngine {
    episodic: Arc<EpisodicStore>,
    facts: Arc<FactStore>,
    extractor: Arc<dyn Extractor>,
    config: MemoryConfig,
}

impl MaintenanceEngine {
    /// Create an engine over the two stores and the extractor collaborator
    pub fn new(
        episodic: Arc<EpisodicStore>,
        facts: Arc<FactStore>,
        extractor: Arc<dyn Extractor>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            episodic,
            facts,
            extractor,
            config,
        }
    }

    /// Run one consolidation + pruning cycle.
    ///
    /// Pruning operates on the id snapshot enumerated before consolidation
    /// ran, but reads each record's current metadata, so a record tagged
    /// as consolidated earlier in the same cycle is already prunable.
    pub async fn run_cycle(&self) -> MnemoResult<MaintenanceReport> {
        tracing::info!("Starting maintenance cycle");

        let snapshot = self.episodic.get_all().await;
        let mut report = self.consolidate(&snapshot).await?;
        report.records_pruned = self.prune(&snapshot).await?;

        tracing::info!(
            candidates = report.candidates,
            facts_written = report.facts_written,
            tagged = report.records_tagged,
            pruned = report.records_pruned,
            "Maintenance cycle complete"
        );

        Ok(report)
    }

    async fn consolidate(&self, snapshot: &[EpisodicRecord]) -> MnemoResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let batch: Vec<ConsolidationCandidate> = snapshot
            .iter()
            .filter(|r| {
                !r.metadata.consolidated
                    && r.metadata.importance_score > self.config.consolidation_importance_threshold
            })
            .map(|r| ConsolidationCandidate {
                id: r.id.clone(),
                content: r.content.clone(),
                importance: r.metadata.importance_score,
            })
            .collect();

        report.candidates = batch.len();

        if batch.len() < self.config.min_consolidation_batch {
            tracing::debug!(
                candidates = batch.len(),
                min = self.config.min_consolidation_batch,
                "Not enough candidates, skipping consolidation"
            );
            report.consolidation_skipped = true;
            return Ok(report);
        }

        // Collaborator failure aborts the whole consolidation step: no
        // partial fact writes, no tagging. The candidates stay eligible
        // and are retried at the next trigger.
        let proposals = match self.extractor.consolidate(&batch).await {
            Ok(proposals) => proposals,
            Err(e) => {
                tracing::warn!(error = %e, "Consolidation collaborator failed, cycle aborted");
                report.consolidation_skipped = true;
                return Ok(report);
            }
        };

        let mut consumed: BTreeSet<String> = BTreeSet::new();

        for proposal in proposals {
            self.facts
                .upsert(
                    &proposal.topic,
                    &proposal.content,
                    FactPatch::new()
                        .with_importance(proposal.importance)
                        .with_category(&proposal.category),
                )
                .await?;
            report.facts_written += 1;

            consumed.extend(proposal.source_ids.iter().cloned());
        }

        // Candidates not referenced by any proposal stay unconsolidated
        // and are reconsidered next cycle.
        if !consumed.is_empty() {
            let ids: Vec<String> = consumed.into_iter().collect();
            report.records_tagged = self.episodic.mark_consolidated(&ids).await?;
        }

        Ok(report)
    }

    async fn prune(&self, snapshot: &[EpisodicRecord]) -> MnemoResult<usize> {
        let cutoff = Utc::now() - Duration::days(self.config.prune_age_days);

        let current = self.episodic.get_all().await;

        let to_delete: Vec<String> = snapshot
            .iter()
            .filter_map(|snap| current.iter().find(|r| r.id == snap.id))
            .filter(|r| {
                let old_enough = r.metadata.created_at < cutoff;
                let low_value =
                    r.metadata.importance_score < self.config.prune_importance_threshold;
                old_enough && (low_value || r.metadata.consolidated)
            })
            .map(|r| r.id.clone())
            .collect();

        if to_delete.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = to_delete.len(), "Pruning old low-value records");
        self.episodic.delete_batch(&to_delete).await
    }
}
