//! Document persistence backends
//!
//! The fact sheet and the episodic collection are each persisted as a
//! whole document, independently loadable and saveable. Backends only
//! need to move JSON documents; all record semantics live in the stores.

use crate::error::{MnemoError, MnemoResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Whole-document load/save keyed by document name
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load a document, or `None` if it has never been saved
    async fn load(&self, name: &str) -> MnemoResult<Option<serde_json::Value>>;

    /// Persist a document, replacing any previous version
    async fn save(&self, name: &str, document: &serde_json::Value) -> MnemoResult<()>;
}

/// In-memory backend for tests and ephemeral sessions
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryDocumentStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, name: &str) -> MnemoResult<Option<serde_json::Value>> {
        Ok(self.documents.read().await.get(name).cloned())
    }

    async fn save(&self, name: &str, document: &serde_json::Value) -> MnemoResult<()> {
        self.documents
            .write()
            .await
            .insert(name.to_string(), document.clone());
        Ok(())
    }
}

/// File-backed store keeping one `<name>.json` per document in a directory
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `base_dir`, creating the directory if needed
    pub async fn new(base_dir: impl Into<PathBuf>) -> MnemoResult<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| MnemoError::storage("create_base_dir", e))?;

        Ok(Self { base_dir })
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", name))
    }

    /// The directory this store writes into
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[async_trait::async_trait]
impl DocumentStore for JsonFileStore {
    async fn load(&self, name: &str) -> MnemoResult<Option<serde_json::Value>> {
        let path = self.document_path(name);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MnemoError::storage("load_document", e)),
        };

        let document = serde_json::from_slice(&bytes)
            .map_err(|e| MnemoError::storage("parse_document", e))?;

        Ok(Some(document))
    }

    async fn save(&self, name: &str, document: &serde_json::Value) -> MnemoResult<()> {
        let path = self.document_path(name);
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| MnemoError::storage("serialize_document", e))?;

        // Write to a sibling temp file first so a crash mid-write never
        // truncates the previous version.
        let tmp_path = self.base_dir.join(format!("{}.json.tmp", name));
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| MnemoError::storage("write_document", e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| MnemoError::storage("commit_document", e))?;

        Ok(())
    }
}
