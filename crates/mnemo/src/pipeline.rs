//! Pipeline orchestrator
//!
//! `MemorySession` owns the full write path for one agent: classify an
//! incoming message, extract a fact candidate, resolve conflicts against
//! the existing fact sheet, store, and trigger maintenance when enough
//! messages have accumulated. Collaborator failures never abort the
//! pipeline; each stage falls back per its documented policy and only
//! persistence errors surface to the caller.
//!
//! Maintenance has two triggers (message counter and background timer).
//! Both enqueue onto the same capacity-1 channel consumed by a single
//! worker, so overlapping triggers coalesce into at most one pending run.

use crate::collaborators::{Classification, Classifier, ExtractedFact, Extractor, VectorIndex};
use crate::config::MemoryConfig;
use crate::consolidation::MaintenanceEngine;
use crate::episodic::{EpisodicOptions, EpisodicRecord, EpisodicStore};
use crate::error::{MnemoError, MnemoResult};
use crate::facts::{FactPatch, FactRecord, FactStore};
use crate::ranker::Grounder;
use crate::storage::DocumentStore;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Advance the message counter against a threshold.
///
/// Returns the new counter value and whether a maintenance cycle should
/// be triggered. Crossing the threshold resets the counter to 0.
pub fn advance_counter(counter: u32, threshold: u32) -> (u32, bool) {
    let next = counter + 1;
    if threshold > 0 && next >= threshold {
        (0, true)
    } else {
        (next, false)
    }
}

/// Summary of one `process_message` call
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Whether a fact was stored
    pub stored: bool,

    /// The topic that was created or updated
    pub topic: Option<String>,

    /// Category assigned by the classifier
    pub category: Option<String>,

    /// Whether the stored content came from conflict resolution
    pub conflict_resolved: bool,

    /// Whether this message crossed the counter threshold and scheduled
    /// a maintenance cycle
    pub maintenance_triggered: bool,
}

/// Builder for [`MemorySession`]
pub struct MemorySessionBuilder {
    classifier: Option<Arc<dyn Classifier>>,
    extractor: Option<Arc<dyn Extractor>>,
    index: Option<Arc<dyn VectorIndex>>,
    backend: Option<Arc<dyn DocumentStore>>,
    config: MemoryConfig,
    background_timer: bool,
}

impl MemorySessionBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            classifier: None,
            extractor: None,
            index: None,
            backend: None,
            config: MemoryConfig::default(),
            background_timer: true,
        }
    }

    /// Set the classifier collaborator
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the extractor collaborator
    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the vector index collaborator
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the document persistence backend (shared by both stores)
    pub fn with_backend(mut self, backend: Arc<dyn DocumentStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the configuration
    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable the interval-based maintenance timer
    /// (the counter trigger is always active)
    pub fn with_background_timer(mut self, enabled: bool) -> Self {
        self.background_timer = enabled;
        self
    }

    /// Build the session: load both stores (migrating the fact sheet if
    /// needed) and start the maintenance worker.
    pub async fn build(self) -> MnemoResult<MemorySession> {
        let classifier = self
            .classifier
            .ok_or_else(|| MnemoError::validation("classifier", "a classifier", "none"))?;
        let extractor = self
            .extractor
            .ok_or_else(|| MnemoError::validation("extractor", "an extractor", "none"))?;
        let index = self
            .index
            .ok_or_else(|| MnemoError::validation("index", "a vector index", "none"))?;
        let backend = self
            .backend
            .ok_or_else(|| MnemoError::validation("backend", "a document store", "none"))?;

        let facts = Arc::new(
            FactStore::new(backend.clone()).with_default_importance(self.config.default_importance),
        );
        facts.load().await?;

        let episodic = Arc::new(
            EpisodicStore::new(backend, index)
                .with_default_importance(self.config.default_importance),
        );
        episodic.load().await?;

        let engine = Arc::new(MaintenanceEngine::new(
            episodic.clone(),
            facts.clone(),
            extractor.clone(),
            self.config.clone(),
        ));

        let (maintenance_tx, mut maintenance_rx) = mpsc::channel::<()>(1);
        let maintenance_runs = Arc::new(AtomicUsize::new(0));

        let worker = {
            let engine = engine.clone();
            let runs = maintenance_runs.clone();
            tokio::spawn(async move {
                while maintenance_rx.recv().await.is_some() {
                    if let Err(e) = engine.run_cycle().await {
                        tracing::warn!(error = %e, "Maintenance cycle failed, will retry on next trigger");
                    }
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let timer = if self.background_timer {
            let tx = maintenance_tx.clone();
            let period = self.config.maintenance_interval;
            Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // The first tick fires immediately; skip it so a fresh
                // session doesn't run maintenance on startup.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let _ = tx.try_send(());
                }
            }))
        } else {
            None
        };

        let grounder = Grounder::new(facts.clone(), episodic.clone(), self.config.clone());

        Ok(MemorySession {
            classifier,
            extractor,
            facts,
            episodic,
            grounder,
            engine,
            config: self.config,
            counter: AtomicU32::new(0),
            maintenance_tx,
            maintenance_runs,
            worker,
            timer,
        })
    }
}

impl Default for MemorySessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One agent's memory: the write pipeline, both stores, grounding, and
/// the maintenance triggers
pub struct MemorySession {
    classifier: Arc<dyn Classifier>,
    extractor: Arc<dyn Extractor>,
    facts: Arc<FactStore>,
    episodic: Arc<EpisodicStore>,
    grounder: Grounder,
    engine: Arc<MaintenanceEngine>,
    config: MemoryConfig,
    counter: AtomicU32,
    maintenance_tx: mpsc::Sender<()>,
    maintenance_runs: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

impl MemorySession {
    /// Start building a session
    pub fn builder() -> MemorySessionBuilder {
        MemorySessionBuilder::new()
    }

    /// Run one incoming message through the full pipeline:
    /// classify, extract, resolve conflicts, store, count.
    pub async fn process_message(
        &self,
        message: &str,
        context: Option<&[String]>,
    ) -> MnemoResult<ProcessOutcome> {
        let classification = match self.classifier.classify(message, context).await {
            Ok(c) if (0.0..=1.0).contains(&c.confidence) => c,
            Ok(c) => {
                tracing::warn!(
                    confidence = c.confidence,
                    "Classifier returned out-of-range confidence, treating as unimportant"
                );
                Classification::unimportant()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Classifier failed, treating message as unimportant");
                Classification::unimportant()
            }
        };

        if !classification.important
            || classification.confidence < self.config.min_classification_confidence
        {
            tracing::debug!(
                category = %classification.category,
                confidence = classification.confidence,
                "Message not worth remembering"
            );
            return Ok(ProcessOutcome {
                category: Some(classification.category),
                ..Default::default()
            });
        }

        let candidate = match self
            .extractor
            .extract(message, &classification.category, context)
            .await
        {
            Ok(fact) => fact,
            Err(e) => {
                // Once classified important, the message is never dropped.
                tracing::warn!(error = %e, "Extractor failed, storing message under 'General'");
                ExtractedFact::fallback(message, &classification.category)
            }
        };

        let (content, conflict_resolved) = self
            .reconcile(&candidate.topic, candidate.content.clone())
            .await?;

        self.facts
            .upsert(
                &candidate.topic,
                content,
                FactPatch::new()
                    .with_entities(candidate.entities)
                    .with_category(candidate.category),
            )
            .await?;

        let maintenance_triggered = self.count_stored_message();

        Ok(ProcessOutcome {
            stored: true,
            topic: Some(candidate.topic),
            category: Some(classification.category),
            conflict_resolved,
            maintenance_triggered,
        })
    }

    /// Conflict policy: when the topic already holds different content,
    /// ask the extractor for a unified statement; if that call fails,
    /// fall back to the raw candidate so storage still proceeds.
    async fn reconcile(&self, topic: &str, candidate: String) -> MnemoResult<(String, bool)> {
        let existing = self.facts.get(topic).await?;

        let Some(existing) = existing else {
            return Ok((candidate, false));
        };

        if existing.content == candidate {
            return Ok((candidate, false));
        }

        match self
            .extractor
            .resolve_conflict(&candidate, &existing.content)
            .await
        {
            Ok(unified) => {
                tracing::info!(topic = %topic, "Conflicting fact reconciled");
                Ok((unified, true))
            }
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    error = %e,
                    "Conflict resolution failed, keeping new content as-is"
                );
                Ok((candidate, false))
            }
        }
    }

    fn count_stored_message(&self) -> bool {
        let mut trigger = false;
        let _ = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |counter| {
                let (next, t) = advance_counter(counter, self.config.message_counter_threshold);
                trigger = t;
                Some(next)
            });

        if trigger {
            // A full channel means a run is already pending; the trigger
            // coalesces into it.
            let _ = self.maintenance_tx.try_send(());
            tracing::debug!("Message counter crossed threshold, maintenance scheduled");
        }

        trigger
    }

    /// Store a raw observation in episodic memory
    pub async fn remember(
        &self,
        content: impl Into<String>,
        options: EpisodicOptions,
    ) -> MnemoResult<String> {
        self.episodic.add(content, options).await
    }

    /// Search episodic memory by semantic relevance
    pub async fn recall(&self, query: &str, limit: usize) -> MnemoResult<Vec<EpisodicRecord>> {
        self.episodic.search(query, limit).await
    }

    /// Delete one episodic record; absent ids are a no-op
    pub async fn forget(&self, id: &str) -> MnemoResult<()> {
        self.episodic.delete(id).await
    }

    /// Delete every episodic record
    pub async fn forget_all(&self) -> MnemoResult<()> {
        self.episodic.delete_all().await
    }

    /// Manually create or revise a fact, through the same conflict policy
    /// as the extraction pipeline
    pub async fn update_fact(
        &self,
        topic: &str,
        content: impl Into<String>,
    ) -> MnemoResult<FactRecord> {
        let (content, _) = self.reconcile(topic, content.into()).await?;
        self.facts.upsert(topic, content, FactPatch::new()).await
    }

    /// Enrich a query with relevant facts and memories
    pub async fn ground(&self, query: &str) -> MnemoResult<String> {
        self.grounder.enrich_query(query).await
    }

    /// Whether grounding would add anything to this query
    pub async fn should_ground(&self, query: &str) -> bool {
        self.grounder.should_ground(query).await
    }

    /// Snapshot of the fact sheet
    pub async fn fact_sheet(&self) -> Vec<(String, FactRecord)> {
        self.facts.fact_sheet().await
    }

    /// The fact sheet rendered as a context block
    pub async fn render_context(&self) -> String {
        self.facts.render_context().await
    }

    /// Run a maintenance cycle inline, bypassing the trigger channel
    pub async fn run_maintenance_now(&self) -> MnemoResult<crate::consolidation::MaintenanceReport> {
        self.engine.run_cycle().await
    }

    /// Request an asynchronous maintenance cycle. Returns false when a
    /// run was already pending (the request coalesced into it).
    pub fn request_maintenance(&self) -> bool {
        self.maintenance_tx.try_send(()).is_ok()
    }

    /// Current message counter value
    pub fn message_counter(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Number of completed background maintenance runs
    pub fn maintenance_runs(&self) -> usize {
        self.maintenance_runs.load(Ordering::SeqCst)
    }

    /// The fact store
    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    /// The episodic store
    pub fn episodic(&self) -> &Arc<EpisodicStore> {
        &self.episodic
    }

    /// Session configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Stop the background tasks, letting any pending maintenance run
    /// drain first
    pub async fn shutdown(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }

        drop(self.maintenance_tx);
        let _ = self.worker.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ConsolidationCandidate, FactProposal, IndexHit};
    use crate::storage::InMemoryDocumentStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn test_advance_counter_is_pure_and_resets() {
        assert_eq!(advance_counter(0, 3), (1, false));
        assert_eq!(advance_counter(1, 3), (2, false));
        assert_eq!(advance_counter(2, 3), (0, true));
        // Same inputs, same outputs
        assert_eq!(advance_counter(2, 3), (0, true));
        // Threshold 0 never triggers
        assert_eq!(advance_counter(7, 0), (8, false));
    }

    struct NullIndex;

    #[async_trait::async_trait]
    impl VectorIndex for NullIndex {
        async fn index(&self, _id: &str, _content: &str) -> MnemoResult<()> {
            Ok(())
        }

        async fn remove(&self, _id: &str) -> MnemoResult<()> {
            Ok(())
        }

        async fn clear(&self) -> MnemoResult<()> {
            Ok(())
        }

        async fn search(&self, _query: &str, _limit: usize) -> MnemoResult<Vec<IndexHit>> {
            Ok(Vec::new())
        }
    }

    /// Classifier double: messages containing "prefer", "uses", or
    /// "name is" are important; everything else is chitchat
    struct KeywordClassifier {
        fail: AtomicBool,
    }

    impl KeywordClassifier {
        fn new() -> Self {
            Self {
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Classifier for KeywordClassifier {
        async fn classify(
            &self,
            message: &str,
            _context: Option<&[String]>,
        ) -> MnemoResult<Classification> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(MnemoError::collaborator("classifier", "unreachable"));
            }

            let lower = message.to_lowercase();
            let important =
                lower.contains("prefer") || lower.contains("uses") || lower.contains("name is")
                    || lower.contains("i use");

            let category = if lower.contains("prefer") || lower.contains("i use") {
                "preference"
            } else if lower.contains("uses") {
                "project"
            } else if lower.contains("name is") {
                "fact"
            } else {
                "chitchat"
            };

            Ok(Classification {
                important,
                category: category.to_string(),
                confidence: if important { 0.9 } else { 1.0 },
            })
        }
    }

    /// Extractor double with a small scripted topic map and a
    /// concatenating conflict resolver
    struct ScriptedExtractor {
        fail_extract: AtomicBool,
        fail_resolve: AtomicBool,
        resolve_calls: AtomicUsize,
        consolidate_calls: AtomicUsize,
        consolidate_delay: Duration,
    }

    impl ScriptedExtractor {
        fn new() -> Self {
            Self {
                fail_extract: AtomicBool::new(false),
                fail_resolve: AtomicBool::new(false),
                resolve_calls: AtomicUsize::new(0),
                consolidate_calls: AtomicUsize::new(0),
                consolidate_delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl Extractor for ScriptedExtractor {
        async fn extract(
            &self,
            message: &str,
            category: &str,
            _context: Option<&[String]>,
        ) -> MnemoResult<ExtractedFact> {
            if self.fail_extract.load(Ordering::SeqCst) {
                return Err(MnemoError::collaborator("extractor", "timeout"));
            }

            let lower = message.to_lowercase();
            let (topic, content, entities) = if lower.contains("dark mode") {
                ("UI Preferences", "Prefers dark mode", vec!["dark mode"])
            } else if lower.contains("light mode") {
                ("UI Preferences", "Prefers light mode", vec!["light mode"])
            } else if lower.contains("fastapi") {
                (
                    "Tech Stack",
                    "Project uses FastAPI and PostgreSQL",
                    vec!["FastAPI", "PostgreSQL"],
                )
            } else if lower.contains("sarah") {
                (
                    "Personal Info",
                    "Name is Sarah, works as a data scientist",
                    vec!["Sarah", "data scientist"],
                )
            } else {
                ("General", message, vec![])
            };

            Ok(ExtractedFact {
                topic: topic.to_string(),
                content: content.to_string(),
                entities: entities.into_iter().map(String::from).collect(),
                category: category.to_string(),
            })
        }

        async fn resolve_conflict(
            &self,
            new_content: &str,
            existing_content: &str,
        ) -> MnemoResult<String> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);

            if self.fail_resolve.load(Ordering::SeqCst) {
                return Err(MnemoError::collaborator("extractor", "resolve timeout"));
            }

            Ok(format!(
                "{} (supersedes: {})",
                new_content, existing_content
            ))
        }

        async fn consolidate(
            &self,
            batch: &[ConsolidationCandidate],
        ) -> MnemoResult<Vec<FactProposal>> {
            self.consolidate_calls.fetch_add(1, Ordering::SeqCst);
            if !self.consolidate_delay.is_zero() {
                tokio::time::sleep(self.consolidate_delay).await;
            }

            Ok(vec![FactProposal {
                topic: "Consolidated Knowledge".to_string(),
                content: format!("{} observations distilled", batch.len()),
                importance: 0.8,
                category: "fact".to_string(),
                source_ids: batch.iter().map(|c| c.id.clone()).collect(),
            }])
        }
    }

    struct Fixture {
        session: MemorySession,
        classifier: Arc<KeywordClassifier>,
        extractor: Arc<ScriptedExtractor>,
    }

    async fn fixture_full(config: MemoryConfig, extractor: ScriptedExtractor) -> Fixture {
        let classifier = Arc::new(KeywordClassifier::new());
        let extractor = Arc::new(extractor);

        let session = MemorySession::builder()
            .with_classifier(classifier.clone())
            .with_extractor(extractor.clone())
            .with_index(Arc::new(NullIndex))
            .with_backend(Arc::new(InMemoryDocumentStore::new()))
            .with_config(config)
            .with_background_timer(false)
            .build()
            .await
            .unwrap();

        Fixture {
            session,
            classifier,
            extractor,
        }
    }

    async fn fixture_with_config(config: MemoryConfig) -> Fixture {
        fixture_full(config, ScriptedExtractor::new()).await
    }

    async fn fixture() -> Fixture {
        fixture_with_config(MemoryConfig::default()).await
    }

    async fn wait_for_maintenance_runs(session: &MemorySession, expected: usize) {
        for _ in 0..200 {
            if session.maintenance_runs() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("maintenance worker never reached {} runs", expected);
    }

    #[tokio::test]
    async fn test_unimportant_message_is_dropped() {
        let fx = fixture().await;

        let outcome = fx.session.process_message("Hello there!", None).await.unwrap();

        assert!(!outcome.stored);
        assert!(outcome.topic.is_none());
        assert_eq!(outcome.category.as_deref(), Some("chitchat"));
        assert!(fx.session.facts().is_empty().await);
        assert_eq!(fx.session.message_counter(), 0);
    }

    #[tokio::test]
    async fn test_important_message_is_extracted_and_stored() {
        let fx = fixture().await;

        let outcome = fx
            .session
            .process_message("I prefer dark mode in all my applications", None)
            .await
            .unwrap();

        assert!(outcome.stored);
        assert_eq!(outcome.topic.as_deref(), Some("UI Preferences"));
        assert_eq!(outcome.category.as_deref(), Some("preference"));
        assert!(!outcome.conflict_resolved);

        let fact = fx.session.facts().get("UI Preferences").await.unwrap().unwrap();
        assert_eq!(fact.content, "Prefers dark mode");
        assert_eq!(fact.metadata.entities, vec!["dark mode".to_string()]);
        assert_eq!(fact.metadata.category, "preference");
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_safe() {
        let fx = fixture().await;
        fx.classifier.fail.store(true, Ordering::SeqCst);

        let outcome = fx
            .session
            .process_message("I prefer dark mode", None)
            .await
            .unwrap();

        assert!(!outcome.stored);
        assert!(fx.session.facts().is_empty().await);
    }

    #[tokio::test]
    async fn test_extractor_failure_stores_fallback_fact() {
        let fx = fixture().await;
        fx.extractor.fail_extract.store(true, Ordering::SeqCst);

        let message = "I prefer tabs over spaces";
        let outcome = fx.session.process_message(message, None).await.unwrap();

        assert!(outcome.stored);
        assert_eq!(outcome.topic.as_deref(), Some("General"));

        let fact = fx.session.facts().get("General").await.unwrap().unwrap();
        assert_eq!(fact.content, message);
        assert!(fact.metadata.entities.is_empty());
        assert_eq!(fact.metadata.category, "preference");
    }

    #[tokio::test]
    async fn test_session_applies_configured_default_importance() {
        let fx = fixture_with_config(MemoryConfig::default().with_default_importance(0.8)).await;

        fx.session
            .process_message("I prefer dark mode", None)
            .await
            .unwrap();
        let fact = fx.session.facts().get("UI Preferences").await.unwrap().unwrap();
        assert_eq!(fact.metadata.importance_score, 0.8);

        let id = fx
            .session
            .remember("unscored observation", EpisodicOptions::new())
            .await
            .unwrap();
        let record = fx.session.episodic().get(&id).await.unwrap().unwrap();
        assert_eq!(record.metadata.importance_score, 0.8);
    }

    #[tokio::test]
    async fn test_conflict_is_resolved_not_duplicated() {
        let fx = fixture().await;

        fx.session
            .process_message("I prefer dark mode in all my applications", None)
            .await
            .unwrap();

        let outcome = fx
            .session
            .process_message("Actually I use light mode now", None)
            .await
            .unwrap();

        assert!(outcome.stored);
        assert!(outcome.conflict_resolved);
        assert_eq!(fx.extractor.resolve_calls.load(Ordering::SeqCst), 1);

        let fact = fx.session.facts().get("UI Preferences").await.unwrap().unwrap();
        assert!(fact.content.contains("Prefers light mode"));
        // The old statement never survives verbatim as the stored content
        assert_ne!(fact.content, "Prefers dark mode");
        assert_eq!(fx.session.facts().len().await, 1);
    }

    #[tokio::test]
    async fn test_conflict_resolution_fails_open() {
        let fx = fixture().await;

        fx.session
            .process_message("I prefer dark mode in all my applications", None)
            .await
            .unwrap();

        fx.extractor.fail_resolve.store(true, Ordering::SeqCst);

        let outcome = fx
            .session
            .process_message("Actually I use light mode now", None)
            .await
            .unwrap();

        // Storage still proceeds with the raw candidate
        assert!(outcome.stored);
        assert!(!outcome.conflict_resolved);

        let fact = fx.session.facts().get("UI Preferences").await.unwrap().unwrap();
        assert_eq!(fact.content, "Prefers light mode");
    }

    #[tokio::test]
    async fn test_identical_content_skips_resolution() {
        let fx = fixture().await;

        fx.session
            .process_message("I prefer dark mode", None)
            .await
            .unwrap();
        let outcome = fx
            .session
            .process_message("I prefer dark mode", None)
            .await
            .unwrap();

        assert!(!outcome.conflict_resolved);
        assert_eq!(fx.extractor.resolve_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_counter_triggers_exactly_one_cycle_per_threshold() {
        let fx = fixture_with_config(
            MemoryConfig::default()
                .with_counter_threshold(3)
                .with_min_consolidation_batch(100), // keep cycles inert
        )
        .await;

        let m1 = fx
            .session
            .process_message("I prefer dark mode", None)
            .await
            .unwrap();
        let m2 = fx
            .session
            .process_message("This project uses FastAPI", None)
            .await
            .unwrap();
        assert!(!m1.maintenance_triggered);
        assert!(!m2.maintenance_triggered);
        assert_eq!(fx.session.message_counter(), 2);

        let m3 = fx
            .session
            .process_message("My name is Sarah", None)
            .await
            .unwrap();
        assert!(m3.maintenance_triggered);
        assert_eq!(fx.session.message_counter(), 0);

        wait_for_maintenance_runs(&fx.session, 1).await;
        assert_eq!(fx.session.maintenance_runs(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_pipeline_with_grounding() {
        let fx = fixture().await;

        fx.session
            .process_message("This project uses FastAPI and PostgreSQL", None)
            .await
            .unwrap();
        fx.session
            .process_message("My name is Sarah and I work as a data scientist", None)
            .await
            .unwrap();

        // Entity lookup sees only exact members
        let hits = fx.session.facts().find_by_entity("Sarah").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "Personal Info");

        let enriched = fx
            .session
            .ground("What does Sarah work with?")
            .await
            .unwrap();
        assert!(enriched.contains("Personal Info"));
        assert!(enriched.contains("User query: What does Sarah work with?"));

        let context = fx.session.render_context().await;
        assert!(context.contains("- Tech Stack: Project uses FastAPI and PostgreSQL"));
    }

    #[tokio::test]
    async fn test_update_fact_goes_through_conflict_policy() {
        let fx = fixture().await;

        fx.session.update_fact("Editor", "Uses Vim").await.unwrap();
        let revised = fx
            .session
            .update_fact("Editor", "Uses Helix")
            .await
            .unwrap();

        assert_eq!(fx.extractor.resolve_calls.load(Ordering::SeqCst), 1);
        assert!(revised.content.contains("Uses Helix"));
        assert!(revised.content.contains("supersedes"));
    }

    #[tokio::test]
    async fn test_remember_recall_forget() {
        let fx = fixture().await;

        let id = fx
            .session
            .remember("Raw observation", EpisodicOptions::new().with_importance(0.7))
            .await
            .unwrap();

        assert_eq!(fx.session.episodic().len().await, 1);

        fx.session.forget(&id).await.unwrap();
        fx.session.forget(&id).await.unwrap(); // no-op safe
        assert!(fx.session.episodic().is_empty().await);
    }

    #[tokio::test]
    async fn test_request_maintenance_coalesces() {
        let mut extractor = ScriptedExtractor::new();
        extractor.consolidate_delay = Duration::from_millis(200);

        // min batch 0 makes every cycle call the (slow) consolidator
        let fx = fixture_full(
            MemoryConfig::default().with_min_consolidation_batch(0),
            extractor,
        )
        .await;

        assert!(fx.session.request_maintenance());

        // Wait until the worker is inside the first cycle, so the channel
        // slot is free again
        for _ in 0..200 {
            if fx.extractor.consolidate_calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // One more request fits the slot; the rest coalesce into it
        assert!(fx.session.request_maintenance());
        assert!(!fx.session.request_maintenance());
        assert!(!fx.session.request_maintenance());

        wait_for_maintenance_runs(&fx.session, 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.session.maintenance_runs(), 2);
        assert_eq!(fx.extractor.consolidate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_reopens_from_persisted_state() {
        let backend = Arc::new(InMemoryDocumentStore::new());

        // Seed a legacy fact-sheet document
        backend
            .save(
                "fact_sheet",
                &serde_json::json!({"Old Topic": "legacy content"}),
            )
            .await
            .unwrap();

        let classifier = Arc::new(KeywordClassifier::new());
        let extractor = Arc::new(ScriptedExtractor::new());

        let session = MemorySession::builder()
            .with_classifier(classifier)
            .with_extractor(extractor)
            .with_index(Arc::new(NullIndex))
            .with_backend(backend)
            .with_background_timer(false)
            .build()
            .await
            .unwrap();

        // The legacy record was migrated at load
        let fact = session.facts().get("Old Topic").await.unwrap().unwrap();
        assert_eq!(fact.content, "legacy content");
        assert_eq!(fact.metadata.category, "unknown");

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_maintenance() {
        let fx = fixture().await;
        fx.session.request_maintenance();
        fx.session.shutdown().await;
    }

    #[tokio::test]
    async fn test_remember_with_extra_metadata() {
        let fx = fixture().await;

        let mut extra = HashMap::new();
        extra.insert("channel".to_string(), "slack".to_string());

        let options = EpisodicOptions {
            importance: Some(0.6),
            source: Some("chat".to_string()),
            extra,
        };

        let id = fx.session.remember("tagged observation", options).await.unwrap();
        let record = fx.session.episodic().get(&id).await.unwrap().unwrap();
        assert_eq!(record.metadata.source, "chat");
        assert_eq!(record.metadata.extra.get("channel").unwrap(), "slack");
    }
}
