//! Collaborator contracts consumed by the memory core
//!
//! The core never implements classification, extraction, or vector search
//! itself; it talks to these black boxes through the traits below and
//! recovers locally whenever one of them fails. Implementations typically
//! wrap an LLM endpoint and an embedding index.

use crate::error::MnemoResult;
use serde::{Deserialize, Serialize};

/// Outcome of classifying a single message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// Whether the message carries information worth remembering
    pub important: bool,

    /// Coarse category (e.g. "preference", "project", "fact", "chitchat")
    pub category: String,

    /// Classifier confidence (0.0 to 1.0)
    pub confidence: f64,
}

impl Classification {
    /// The safe default applied when the classifier fails or returns
    /// malformed output: treat the message as unimportant
    pub fn unimportant() -> Self {
        Self {
            important: false,
            category: "chitchat".to_string(),
            confidence: 0.0,
        }
    }
}

/// A structured fact candidate extracted from one message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    /// Short human-readable topic acting as the fact-sheet key
    pub topic: String,

    /// Concise fact statement
    pub content: String,

    /// Entities mentioned (names, technologies, places)
    pub entities: Vec<String>,

    /// Category carried over from classification
    pub category: String,
}

impl ExtractedFact {
    /// Fallback extraction used when the extractor fails: the message is
    /// never silently dropped once classified important
    pub fn fallback(message: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            topic: "General".to_string(),
            content: message.into(),
            entities: Vec::new(),
            category: category.into(),
        }
    }
}

/// One episodic record offered to the batch consolidation capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationCandidate {
    /// Episodic record id
    pub id: String,

    /// Raw observation text
    pub content: String,

    /// Importance score of the record
    pub importance: f64,
}

/// A fact update proposed by batch consolidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactProposal {
    /// Target fact-sheet topic
    pub topic: String,

    /// Consolidated statement
    pub content: String,

    /// Importance assigned by the consolidator (0.0 to 1.0)
    pub importance: f64,

    /// Category of the consolidated fact
    pub category: String,

    /// Episodic ids this proposal was derived from
    pub source_ids: Vec<String>,
}

/// A ranked hit returned by the vector index
#[derive(Debug, Clone)]
pub struct IndexHit {
    /// Episodic record id
    pub id: String,

    /// Relevance score (higher is more relevant)
    pub score: f32,
}

/// Labels a message as important or not, with a category and confidence
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    /// Classify a message, optionally with recent conversation context
    async fn classify(
        &self,
        message: &str,
        context: Option<&[String]>,
    ) -> MnemoResult<Classification>;
}

/// Turns messages into structured fact candidates and reconciles conflicts
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Extract a single structured fact from a message
    async fn extract(
        &self,
        message: &str,
        category: &str,
        context: Option<&[String]>,
    ) -> MnemoResult<ExtractedFact>;

    /// Produce one unified statement from two conflicting fact contents
    async fn resolve_conflict(
        &self,
        new_content: &str,
        existing_content: &str,
    ) -> MnemoResult<String>;

    /// Consolidate a batch of episodic candidates into fact proposals.
    /// May return an empty list when nothing in the batch is stable enough.
    async fn consolidate(
        &self,
        batch: &[ConsolidationCandidate],
    ) -> MnemoResult<Vec<FactProposal>>;
}

/// Approximate nearest-neighbor search over stored episodic content
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Add (or re-add) a record's content to the index
    async fn index(&self, id: &str, content: &str) -> MnemoResult<()>;

    /// Remove a record from the index; absent ids are a no-op
    async fn remove(&self, id: &str) -> MnemoResult<()>;

    /// Drop every indexed record
    async fn clear(&self) -> MnemoResult<()>;

    /// Return up to `limit` hits, best first
    async fn search(&self, query: &str, limit: usize) -> MnemoResult<Vec<IndexHit>>;
}
