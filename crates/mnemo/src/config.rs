//! Configuration for the memory lifecycle

use std::time::Duration;

/// Tunable thresholds and policies for the memory system
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Minimum importance an episodic record needs to be a consolidation
    /// candidate
    pub consolidation_importance_threshold: f64,

    /// Minimum candidate count before a consolidation call is worth making
    pub min_consolidation_batch: usize,

    /// Records below this importance are prunable once old enough
    pub prune_importance_threshold: f64,

    /// Age in days after which low-importance or consolidated records are
    /// pruned
    pub prune_age_days: i64,

    /// Number of stored facts between counter-triggered maintenance cycles
    pub message_counter_threshold: u32,

    /// Period of the background maintenance timer
    pub maintenance_interval: Duration,

    /// Classifications below this confidence are treated as unimportant
    pub min_classification_confidence: f64,

    /// Importance assigned to records and facts that don't specify one
    pub default_importance: f64,

    /// Maximum number of facts injected when grounding a query
    pub max_grounding_facts: usize,

    /// Maximum number of episodic memories injected when grounding a query
    pub max_grounding_memories: usize,
}

impl MemoryConfig {
    /// Create a configuration with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the message counter threshold
    pub fn with_counter_threshold(mut self, threshold: u32) -> Self {
        self.message_counter_threshold = threshold;
        self
    }

    /// Set the background maintenance interval
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the minimum classification confidence
    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_classification_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Set the minimum consolidation batch size
    pub fn with_min_consolidation_batch(mut self, batch: usize) -> Self {
        self.min_consolidation_batch = batch;
        self
    }

    /// Set the importance assigned to records and facts that don't
    /// specify one
    pub fn with_default_importance(mut self, importance: f64) -> Self {
        self.default_importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Set the pruning age cutoff in days
    pub fn with_prune_age_days(mut self, days: i64) -> Self {
        self.prune_age_days = days;
        self
    }

    /// Set the maximum number of grounding facts
    pub fn with_max_grounding_facts(mut self, max: usize) -> Self {
        self.max_grounding_facts = max;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            consolidation_importance_threshold: 0.4,
            min_consolidation_batch: 3,
            prune_importance_threshold: 0.3,
            prune_age_days: 30,
            message_counter_threshold: 10,
            maintenance_interval: Duration::from_secs(60 * 60),
            min_classification_confidence: 0.6,
            default_importance: 0.5,
            max_grounding_facts: 5,
            max_grounding_memories: 2,
        }
    }
}
