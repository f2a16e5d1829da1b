//! File-based memory store: persistent JSON-lines storage.
//!
//! Layout under the store directory:
//! - `memories.jsonl`: one JSON-encoded `MemoryRecord` per line
//! - `profile.json`: the user profile, if one was set
//!
//! Records are loaded on open and the whole file is rewritten on every
//! mutation, through a temp file and rename.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use toolbox_core::{Embedder, MemoryError, MemoryHit, MemoryRecord, MemoryStore};
use tracing::{debug, warn};

use crate::index::MemoryIndex;

const MEMORIES_FILE: &str = "memories.jsonl";
const PROFILE_FILE: &str = "profile.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredProfile {
    text: String,
    updated_at: DateTime<Utc>,
}

/// A file-backed memory store.
pub struct FileStore {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: RwLock<MemoryIndex>,
    profile: RwLock<Option<String>>,
}

impl FileStore {
    /// Open the store in `dir`. Missing files mean an empty store; the
    /// directory is created on first write. Vectors are not persisted; every
    /// record is re-embedded with `embedder` here.
    pub async fn open(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        let dir = dir.into();
        let records = load_records(&dir.join(MEMORIES_FILE)).await?;
        let profile = load_profile(&dir.join(PROFILE_FILE)).await?;
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embeddings = embedder.embed(&texts).await?;
        debug!(
            path = %dir.display(),
            count = records.len(),
            embedder = embedder.name(),
            "File memory store loaded"
        );

        Ok(Self {
            dir,
            embedder,
            index: RwLock::new(MemoryIndex::from_records(records, embeddings)?),
            profile: RwLock::new(profile),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn flush_records(&self, index: &MemoryIndex) -> Result<(), MemoryError> {
        let mut content = String::new();
        for record in index.records() {
            let line = serde_json::to_string(record)
                .map_err(|e| MemoryError::Serialization(format!("memory record: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }
        self.write_atomic(MEMORIES_FILE, content.as_bytes()).await
    }

    async fn write_atomic(&self, file: &str, bytes: &[u8]) -> Result<(), MemoryError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to create memory directory: {e}")))?;

        let target = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to replace {}: {e}", target.display())))
    }
}

async fn load_records(path: &Path) -> Result<Vec<MemoryRecord>, MemoryError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MemoryError::Storage(format!("Failed to read {}: {e}", path.display()))),
    };

    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<MemoryRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping corrupted memory record");
                None
            }
        })
        .collect())
}

async fn load_profile(path: &Path) -> Result<Option<String>, MemoryError> {
    match tokio::fs::read_to_string(path).await {
        Ok(c) => serde_json::from_str::<StoredProfile>(&c)
            .map(|p| Some(p.text))
            .map_err(|e| MemoryError::Serialization(format!("profile: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MemoryError::Storage(format!("Failed to read {}: {e}", path.display()))),
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, text: &str, metadata: Option<Map<String, Value>>) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed_one(text).await?;
        let mut index = self.index.write().await;
        let id = index.save(text, metadata, embedding);
        self.flush_records(&index).await?;
        Ok(id)
    }

    async fn recall(&self, query: &str, k: usize) -> Result<Vec<MemoryHit>, MemoryError> {
        if self.index.read().await.is_empty() {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed_one(query).await?;
        Ok(self.index.read().await.recall(&query_embedding, k))
    }

    async fn update(
        &self,
        id: &str,
        text: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), MemoryError> {
        if !self.index.read().await.contains(id) {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        let embedding = self.embedder.embed_one(text).await?;
        let mut index = self.index.write().await;
        index.update(id, text, metadata, embedding)?;
        self.flush_records(&index).await
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let mut index = self.index.write().await;
        index.delete(id)?;
        self.flush_records(&index).await
    }

    async fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.index.read().await.records().to_vec())
    }

    async fn get_profile(&self) -> Result<Option<String>, MemoryError> {
        Ok(self.profile.read().await.clone())
    }

    async fn set_profile(&self, text: &str) -> Result<(), MemoryError> {
        let mut profile = self.profile.write().await;
        let stored = StoredProfile {
            text: text.to_string(),
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| MemoryError::Serialization(format!("profile: {e}")))?;
        self.write_atomic(PROFILE_FILE, &bytes).await?;
        *profile = Some(stored.text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[tokio::test]
    async fn save_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        let id = store.save("Rust is great", None).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(MEMORIES_FILE)).unwrap();
        assert!(content.contains("Rust is great"));

        let reopened = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        let hits = reopened.recall("Rust is great", 1).await.unwrap();
        assert_eq!(hits[0].id, id);
    }

    #[tokio::test]
    async fn delete_and_update_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        let keep = store.save("keep me", None).await.unwrap();
        let gone = store.save("delete me", None).await.unwrap();
        store.delete(&gone).await.unwrap();
        store.update(&keep, "kept and edited", None).await.unwrap();

        let reopened = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        let records = reopened.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "kept and edited");
    }

    #[tokio::test]
    async fn profile_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        store.set_profile("Name: Ada\nLikes: hiking").await.unwrap();

        let reopened = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        assert_eq!(reopened.get_profile().await.unwrap().as_deref(), Some("Name: Ada\nLikes: hiking"));
    }

    #[tokio::test]
    async fn missing_directory_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("not-yet"), HashingEmbedder::shared())
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.get_profile().await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MEMORIES_FILE),
            concat!(
                r#"{"id":"1","text":"valid","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z"}"#,
                "\nthis is not json\n",
                r#"{"id":"2","text":"also valid","created_at":"2026-01-01T00:00:00Z","updated_at":"2026-01-01T00:00:00Z"}"#,
                "\n"
            ),
        )
        .unwrap();

        let store = FileStore::open(dir.path(), HashingEmbedder::shared()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
