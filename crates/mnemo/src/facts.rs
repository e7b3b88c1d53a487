//! Fact store - topic-keyed semantic knowledge
//!
//! The fact sheet is the distilled, long-term half of the memory system:
//! one record per topic, merged on write, never pruned. Topics are exact
//! case-sensitive keys ("Tech Stack" and "tech stack" are distinct on
//! purpose; see `migrate` for the only place the legacy format leaks in).
//!
//! Early versions persisted facts as bare topic -> string pairs. Those
//! documents are still loadable: `migrate` upgrades them in place, once,
//! idempotently, and the in-memory representation is always structured.

use crate::error::{MnemoError, MnemoResult};
use crate::storage::DocumentStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const FACT_SHEET_DOCUMENT: &str = "fact_sheet";

fn default_importance() -> f64 {
    0.5
}

fn default_category() -> String {
    "unknown".to_string()
}

/// Metadata attached to every fact record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactMetadata {
    /// Entities mentioned by the fact (names, technologies, places)
    #[serde(default)]
    pub entities: Vec<String>,

    /// Coarse category (e.g. "preference", "project", "fact")
    #[serde(default = "default_category")]
    pub category: String,

    /// Importance score (0.0 to 1.0)
    #[serde(default = "default_importance")]
    pub importance_score: f64,

    /// When the topic was first written; preserved across all updates
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the record was last written
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// When the record was last read
    #[serde(default = "Utc::now")]
    pub last_accessed: DateTime<Utc>,
}

/// The current best-known statement for one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
    /// The fact statement
    pub content: String,

    /// Record metadata
    pub metadata: FactMetadata,
}

/// Optional metadata supplied with an upsert; unset fields keep the
/// existing record's values (or the documented defaults for new topics)
#[derive(Debug, Clone, Default)]
pub struct FactPatch {
    /// Replace the entity list
    pub entities: Option<Vec<String>>,

    /// Replace the category
    pub category: Option<String>,

    /// Replace the importance score
    pub importance_score: Option<f64>,
}

impl FactPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entity list
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the importance score (clamped to [0, 1])
    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance_score = Some(importance.clamp(0.0, 1.0));
        self
    }
}

/// On-disk shape of one fact-sheet entry. Bare strings are the legacy
/// format; everything is structured after `migrate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredFact {
    Structured(FactRecord),
    Legacy(String),
}

impl StoredFact {
    fn into_record(self, default_importance: f64) -> FactRecord {
        match self {
            StoredFact::Structured(record) => record,
            StoredFact::Legacy(content) => {
                let now = Utc::now();
                FactRecord {
                    content,
                    metadata: FactMetadata {
                        entities: Vec::new(),
                        category: default_category(),
                        importance_score: default_importance,
                        created_at: now,
                        updated_at: now,
                        last_accessed: now,
                    },
                }
            }
        }
    }
}

/// Durable topic -> fact mapping, persisted as one document
pub struct FactStore {
    backend: Arc<dyn DocumentStore>,
    sheet: RwLock<BTreeMap<String, FactRecord>>,
    default_importance: f64,
}

impl FactStore {
    /// Create an empty fact store over the given backend
    pub fn new(backend: Arc<dyn DocumentStore>) -> Self {
        Self {
            backend,
            sheet: RwLock::new(BTreeMap::new()),
            default_importance: default_importance(),
        }
    }

    /// Set the importance assigned to new topics and migrated legacy
    /// entries that don't carry one (clamped to [0, 1])
    pub fn with_default_importance(mut self, importance: f64) -> Self {
        self.default_importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Load the persisted fact sheet, upgrading any legacy entries.
    /// Returns the number of topics loaded.
    pub async fn load(&self) -> MnemoResult<usize> {
        self.migrate().await?;
        Ok(self.sheet.read().await.len())
    }

    /// Upgrade the persisted document to the structured format: bare-string
    /// entries become structured records (category "unknown", default
    /// importance), and structured entries missing fields get them
    /// backfilled. Returns the number of entries that changed.
    ///
    /// Idempotent: a second run finds a fully structured document, changes
    /// nothing, and writes nothing.
    pub async fn migrate(&self) -> MnemoResult<usize> {
        let Some(document) = self.backend.load(FACT_SHEET_DOCUMENT).await? else {
            return Ok(0);
        };

        let raw: BTreeMap<String, StoredFact> = serde_json::from_value(document.clone())
            .map_err(|e| MnemoError::storage("parse_fact_sheet", e))?;

        let mut sheet = BTreeMap::new();
        let mut upgraded = 0;

        for (topic, stored) in raw {
            let original = document.get(&topic).cloned();
            let record = stored.into_record(self.default_importance);

            let reserialized = serde_json::to_value(&record)
                .map_err(|e| MnemoError::storage("serialize_fact_record", e))?;
            if original.as_ref() != Some(&reserialized) {
                upgraded += 1;
            }

            sheet.insert(topic, record);
        }

        if upgraded > 0 {
            self.persist(&sheet).await?;
            tracing::info!(upgraded, "Migrated legacy fact-sheet entries");
        }

        *self.sheet.write().await = sheet;
        Ok(upgraded)
    }

    /// Create or merge-update the record for a topic.
    ///
    /// Existing topics keep their `created_at`; patch fields win over the
    /// old metadata, unset patch fields keep it. New topics get the
    /// store's default importance unless the patch says otherwise. If the backing
    /// medium cannot be written, the in-memory sheet is left exactly as it
    /// was and the error is returned.
    pub async fn upsert(
        &self,
        topic: impl Into<String>,
        content: impl Into<String>,
        patch: FactPatch,
    ) -> MnemoResult<FactRecord> {
        let topic = topic.into();
        let content = content.into();
        let now = Utc::now();

        let mut guard = self.sheet.write().await;
        let mut next = guard.clone();

        let record = match next.get(&topic) {
            Some(old) => FactRecord {
                content,
                metadata: FactMetadata {
                    entities: patch.entities.unwrap_or_else(|| old.metadata.entities.clone()),
                    category: patch.category.unwrap_or_else(|| old.metadata.category.clone()),
                    importance_score: patch
                        .importance_score
                        .unwrap_or(old.metadata.importance_score),
                    created_at: old.metadata.created_at,
                    updated_at: now,
                    last_accessed: now,
                },
            },
            None => FactRecord {
                content,
                metadata: FactMetadata {
                    entities: patch.entities.unwrap_or_default(),
                    category: patch.category.unwrap_or_else(default_category),
                    importance_score: patch.importance_score.unwrap_or(self.default_importance),
                    created_at: now,
                    updated_at: now,
                    last_accessed: now,
                },
            },
        };

        next.insert(topic.clone(), record.clone());
        self.persist(&next).await?;
        *guard = next;

        tracing::debug!(topic = %topic, "Fact upserted");
        Ok(record)
    }

    /// Fetch the record for a topic, advancing its `last_accessed`
    pub async fn get(&self, topic: &str) -> MnemoResult<Option<FactRecord>> {
        let mut guard = self.sheet.write().await;

        if !guard.contains_key(topic) {
            return Ok(None);
        }

        let mut next = guard.clone();
        let record = next.get_mut(topic).map(|r| {
            r.metadata.last_accessed = Utc::now();
            r.clone()
        });

        self.persist(&next).await?;
        *guard = next;

        Ok(record)
    }

    /// Find every fact whose entity set contains `entity`, compared
    /// case-insensitively but as an exact member (never a substring).
    /// Each hit's `last_accessed` is advanced.
    pub async fn find_by_entity(&self, entity: &str) -> MnemoResult<Vec<(String, FactRecord)>> {
        let needle = entity.to_lowercase();
        let now = Utc::now();

        let mut guard = self.sheet.write().await;
        let mut next = guard.clone();

        let mut matches = Vec::new();
        for (topic, record) in next.iter_mut() {
            let is_member = record
                .metadata
                .entities
                .iter()
                .any(|e| e.to_lowercase() == needle);

            if is_member {
                record.metadata.last_accessed = now;
                matches.push((topic.clone(), record.clone()));
            }
        }

        if !matches.is_empty() {
            self.persist(&next).await?;
            *guard = next;
        }

        Ok(matches)
    }

    /// Snapshot of the whole fact sheet, in topic order.
    /// Enumeration is not a read-path touch.
    pub async fn fact_sheet(&self) -> Vec<(String, FactRecord)> {
        self.sheet
            .read()
            .await
            .iter()
            .map(|(t, r)| (t.clone(), r.clone()))
            .collect()
    }

    /// Number of stored topics
    pub async fn len(&self) -> usize {
        self.sheet.read().await.len()
    }

    /// Whether the sheet is empty
    pub async fn is_empty(&self) -> bool {
        self.sheet.read().await.is_empty()
    }

    /// Render the fact sheet as a context block for prompt injection
    pub async fn render_context(&self) -> String {
        let sheet = self.sheet.read().await;

        let facts = if sheet.is_empty() {
            "No structured facts stored yet.".to_string()
        } else {
            sheet
                .iter()
                .map(|(topic, record)| format!("- {}: {}", topic, record.content))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!("--- STRUCTURED FACT SHEET ---\n{}", facts)
    }

    async fn persist(&self, sheet: &BTreeMap<String, FactRecord>) -> MnemoResult<()> {
        let document = serde_json::to_value(sheet)
            .map_err(|e| MnemoError::storage("serialize_fact_sheet", e))?;

        self.backend.save(FACT_SHEET_DOCUMENT, &document).await
    }
}
