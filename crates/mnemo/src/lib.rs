//! # Mnemo - Memory Lifecycle for Conversational Agents
//!
//! **Mnemo** manages what an agent remembers across conversations:
//!
//! - **Episodic store**: raw timestamped observations with importance scores
//! - **Fact sheet**: distilled topic-keyed knowledge, merged on write
//! - **Grounding**: query enrichment from relevant facts and memories
//! - **Maintenance**: background consolidation and pruning
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemo::prelude::*;
//! use std::sync::Arc;
//! # use mnemo::collaborators::{Classifier, Extractor, VectorIndex};
//! # async fn demo(
//! #     classifier: Arc<dyn Classifier>,
//! #     extractor: Arc<dyn Extractor>,
//! #     index: Arc<dyn VectorIndex>,
//! # ) -> MnemoResult<()> {
//! let session = MemorySession::builder()
//!     .with_classifier(classifier)
//!     .with_extractor(extractor)
//!     .with_index(index)
//!     .with_backend(Arc::new(JsonFileStore::new("./memory").await?))
//!     .build()
//!     .await?;
//!
//! // Every message flows through classify -> extract -> reconcile -> store
//! let outcome = session.process_message("I prefer dark mode", None).await?;
//! println!("stored under {:?}", outcome.topic);
//!
//! // Queries get enriched with whatever the agent already knows
//! let grounded = session.ground("what theme do I use?").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The core never talks to a model or an embedding index directly. Three
//! collaborator traits ([`Classifier`](collaborators::Classifier),
//! [`Extractor`](collaborators::Extractor),
//! [`VectorIndex`](collaborators::VectorIndex)) mark the seams, and every
//! collaborator failure degrades to a documented fallback instead of
//! aborting the pipeline. Only persistence failures surface as errors.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            MemorySession                │
//! │  classify -> extract -> reconcile       │
//! └──────┬───────────────┬──────────────────┘
//!        │               │
//!   ┌────▼─────┐   ┌─────▼──────┐   ┌──────────────┐
//!   │ Episodic │   │ Fact Sheet │◄──│ Maintenance  │
//!   │  Store   │──►│            │   │ (consolidate │
//!   └──────────┘   └────────────┘   │   + prune)   │
//!                                   └──────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/mnemo/0.1.0")]
#![warn(missing_docs)]

pub mod collaborators;
pub mod config;
pub mod consolidation;
pub mod episodic;
pub mod error;
pub mod facts;
pub mod pipeline;
pub mod ranker;
pub mod storage;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::collaborators::{
        Classification, Classifier, ConsolidationCandidate, ExtractedFact, Extractor,
        FactProposal, IndexHit, VectorIndex,
    };
    pub use crate::config::MemoryConfig;
    pub use crate::consolidation::{MaintenanceEngine, MaintenanceReport};
    pub use crate::episodic::{EpisodicMetadata, EpisodicOptions, EpisodicRecord, EpisodicStore};
    pub use crate::error::{MnemoError, MnemoResult};
    pub use crate::facts::{FactMetadata, FactPatch, FactRecord, FactStore};
    pub use crate::pipeline::{MemorySession, MemorySessionBuilder, ProcessOutcome};
    pub use crate::ranker::{Grounder, RankedFact};
    pub use crate::storage::{DocumentStore, InMemoryDocumentStore, JsonFileStore};
}
