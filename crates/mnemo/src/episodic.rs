//! Episodic store - raw timestamped observations
//!
//! Episodic records are the unfiltered input of the memory system: each
//! one captures a single observation with an importance score and access
//! timestamps. Content is immutable after creation; metadata evolves as
//! the record is read, consolidated into facts, and eventually pruned.
//!
//! Approximate relevance matching is delegated to a [`VectorIndex`]
//! collaborator; the store owns everything else about a record's life.

use crate::collaborators::VectorIndex;
use crate::error::{MnemoError, MnemoResult};
use crate::storage::DocumentStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

const EPISODIC_DOCUMENT: &str = "episodic";

fn default_importance() -> f64 {
    0.5
}

/// Mutable metadata carried by every episodic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMetadata {
    /// When the record was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last read-path touch (search hit or direct access)
    #[serde(default = "Utc::now")]
    pub last_accessed: DateTime<Utc>,

    /// Importance score (0.0 to 1.0), drives consolidation and pruning
    #[serde(default = "default_importance")]
    pub importance_score: f64,

    /// Whether this record has already contributed to a fact
    #[serde(default)]
    pub consolidated: bool,

    /// Where the observation came from (e.g. "chat", "import")
    #[serde(default)]
    pub source: String,

    /// Free-form extra metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

/// A single raw observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicRecord {
    /// Opaque unique identifier, never reused
    pub id: String,

    /// Free-text observation, immutable after creation
    pub content: String,

    /// Mutable metadata
    pub metadata: EpisodicMetadata,
}

/// Optional attributes for a new episodic record
#[derive(Debug, Clone, Default)]
pub struct EpisodicOptions {
    /// Importance score; the store's default applies when unspecified
    pub importance: Option<f64>,

    /// Origin label
    pub source: Option<String>,

    /// Free-form extra metadata
    pub extra: HashMap<String, String>,
}

impl EpisodicOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the importance score (clamped to [0, 1])
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance.clamp(0.0, 1.0));
        self
    }

    /// Set the source label
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add an extra metadata entry
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Durable collection of episodic records
pub struct EpisodicStore {
    backend: Arc<dyn DocumentStore>,
    index: Arc<dyn VectorIndex>,
    records: RwLock<BTreeMap<String, EpisodicRecord>>,
    default_importance: f64,
}

impl EpisodicStore {
    /// Create an empty store over the given backend and index
    pub fn new(backend: Arc<dyn DocumentStore>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            backend,
            index,
            records: RwLock::new(BTreeMap::new()),
            default_importance: default_importance(),
        }
    }

    /// Set the importance assigned to records added without one
    /// (clamped to [0, 1])
    pub fn with_default_importance(mut self, importance: f64) -> Self {
        self.default_importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Load previously persisted records and rebuild the vector index.
    /// Returns the number of records loaded.
    pub async fn load(&self) -> MnemoResult<usize> {
        let Some(document) = self.backend.load(EPISODIC_DOCUMENT).await? else {
            return Ok(0);
        };

        let loaded: BTreeMap<String, EpisodicRecord> = serde_json::from_value(document)
            .map_err(|e| MnemoError::storage("parse_episodic_document", e))?;

        let rebuilds = loaded.values().map(|record| async move {
            if let Err(e) = self.index.index(&record.id, &record.content).await {
                tracing::warn!(id = %record.id, error = %e, "Vector index rebuild skipped a record");
            }
        });
        futures::future::join_all(rebuilds).await;

        let count = loaded.len();
        *self.records.write().await = loaded;

        tracing::debug!(count, "Loaded episodic records");
        Ok(count)
    }

    /// Store a new observation and return its id
    pub async fn add(&self, content: impl Into<String>, options: EpisodicOptions) -> MnemoResult<String> {
        let now = Utc::now();
        let record = EpisodicRecord {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: EpisodicMetadata {
                created_at: now,
                last_accessed: now,
                importance_score: options.importance.unwrap_or(self.default_importance),
                consolidated: false,
                source: options.source.unwrap_or_default(),
                extra: options.extra,
            },
        };

        let id = record.id.clone();

        let mut guard = self.records.write().await;
        let mut next = guard.clone();
        next.insert(id.clone(), record.clone());
        self.persist(&next).await?;
        *guard = next;
        drop(guard);

        if let Err(e) = self.index.index(&id, &record.content).await {
            // The record is durably stored either way; it just won't be
            // findable by semantic search until the next reload.
            tracing::warn!(id = %id, error = %e, "Vector index rejected new record");
        }

        tracing::debug!(id = %id, "Stored episodic record");
        Ok(id)
    }

    /// Semantic search over stored records, best match first.
    ///
    /// Matching is delegated to the vector index; an index failure yields
    /// an empty result, not an error. Every returned record's
    /// `last_accessed` is advanced first.
    pub async fn search(&self, query: &str, limit: usize) -> MnemoResult<Vec<EpisodicRecord>> {
        let hits = match self.index.search(query, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Vector index search failed, returning no memories");
                return Ok(Vec::new());
            }
        };

        let now = Utc::now();
        let mut guard = self.records.write().await;
        let mut next = guard.clone();

        let mut results = Vec::new();
        for hit in hits.into_iter().take(limit) {
            if let Some(record) = next.get_mut(&hit.id) {
                record.metadata.last_accessed = now;
                results.push(record.clone());
            }
        }

        if !results.is_empty() {
            self.persist(&next).await?;
            *guard = next;
        }

        Ok(results)
    }

    /// Fetch one record by id, advancing its `last_accessed`
    pub async fn get(&self, id: &str) -> MnemoResult<Option<EpisodicRecord>> {
        let mut guard = self.records.write().await;

        if !guard.contains_key(id) {
            return Ok(None);
        }

        let mut next = guard.clone();
        let record = next.get_mut(id).map(|r| {
            r.metadata.last_accessed = Utc::now();
            r.clone()
        });

        self.persist(&next).await?;
        *guard = next;

        Ok(record)
    }

    /// Snapshot of every record, for the maintenance engines.
    /// Enumeration is not a read-path touch: `last_accessed` is untouched.
    pub async fn get_all(&self) -> Vec<EpisodicRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Remove one record. Absent ids are a no-op, not an error.
    pub async fn delete(&self, id: &str) -> MnemoResult<()> {
        let mut guard = self.records.write().await;

        if !guard.contains_key(id) {
            return Ok(());
        }

        let mut next = guard.clone();
        next.remove(id);
        self.persist(&next).await?;
        *guard = next;
        drop(guard);

        if let Err(e) = self.index.remove(id).await {
            tracing::warn!(id = %id, error = %e, "Vector index failed to drop record");
        }

        Ok(())
    }

    /// Remove every record
    pub async fn delete_all(&self) -> MnemoResult<()> {
        let mut guard = self.records.write().await;
        let next = BTreeMap::new();
        self.persist(&next).await?;
        *guard = next;
        drop(guard);

        if let Err(e) = self.index.clear().await {
            tracing::warn!(error = %e, "Vector index failed to clear");
        }

        Ok(())
    }

    /// Best-effort batch delete; ids that are already gone are skipped.
    /// Returns how many records were actually removed.
    pub async fn delete_batch(&self, ids: &[String]) -> MnemoResult<usize> {
        let mut guard = self.records.write().await;
        let mut next = guard.clone();

        let mut removed = Vec::new();
        for id in ids {
            if next.remove(id).is_some() {
                removed.push(id.clone());
            }
        }

        if removed.is_empty() {
            return Ok(0);
        }

        self.persist(&next).await?;
        *guard = next;
        drop(guard);

        for id in &removed {
            if let Err(e) = self.index.remove(id).await {
                tracing::warn!(id = %id, error = %e, "Vector index failed to drop record");
            }
        }

        Ok(removed.len())
    }

    /// Flip the `consolidated` flag on the given records.
    /// Re-tagging an already consolidated record is a no-op.
    pub async fn mark_consolidated(&self, ids: &[String]) -> MnemoResult<usize> {
        let mut guard = self.records.write().await;
        let mut next = guard.clone();

        let mut tagged = 0;
        for id in ids {
            if let Some(record) = next.get_mut(id) {
                if !record.metadata.consolidated {
                    record.metadata.consolidated = true;
                    tagged += 1;
                }
            }
        }

        if tagged == 0 {
            return Ok(0);
        }

        self.persist(&next).await?;
        *guard = next;

        Ok(tagged)
    }

    async fn persist(&self, records: &BTreeMap<String, EpisodicRecord>) -> MnemoResult<()> {
        let document = serde_json::to_value(records)
            .map_err(|e| MnemoError::storage("serialize_episodic_document", e))?;

        self.backend.save(EPISODIC_DOCUMENT, &document).await
    }
}
