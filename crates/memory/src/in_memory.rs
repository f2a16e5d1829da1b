//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use toolbox_core::{Embedder, MemoryError, MemoryHit, MemoryRecord, MemoryStore};

use crate::index::MemoryIndex;

/// A store that lives for the process lifetime only.
pub struct InMemoryStore {
    embedder: Arc<dyn Embedder>,
    index: RwLock<MemoryIndex>,
    profile: RwLock<Option<String>>,
}

impl InMemoryStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: RwLock::new(MemoryIndex::default()),
            profile: RwLock::new(None),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, text: &str, metadata: Option<Map<String, Value>>) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed_one(text).await?;
        Ok(self.index.write().await.save(text, metadata, embedding))
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
        self.index.write().await.update(id, text, metadata, embedding)
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        self.index.write().await.delete(id)
    }

    async fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError> {
        Ok(self.index.read().await.records().to_vec())
    }

    async fn get_profile(&self) -> Result<Option<String>, MemoryError> {
        Ok(self.profile.read().await.clone())
    }

    async fn set_profile(&self, text: &str) -> Result<(), MemoryError> {
        *self.profile.write().await = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[tokio::test]
    async fn saved_text_is_recalled_by_itself() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        store.save("The user prefers Rust", None).await.unwrap();
        let target = store.save("Favourite colour is teal", None).await.unwrap();
        store.save("Lives in Lisbon", None).await.unwrap();

        let hits = store.recall("Favourite colour is teal", 3).await.unwrap();
        assert_eq!(hits[0].id, target);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn recall_returns_nearest_even_without_overlap() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        store.save("user likes hiking", None).await.unwrap();
        let hits = store.recall("hobbies", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "user likes hiking");
    }

    #[tokio::test]
    async fn recall_respects_k() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        for i in 0..5 {
            store.save(&format!("note number {i}"), None).await.unwrap();
        }
        assert_eq!(store.recall("note", 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn duplicate_save_returns_same_id() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        let a = store.save("same", None).await.unwrap();
        let b = store.save("same", None).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_unknown_ids() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        assert!(matches!(store.update("nope", "x", None).await, Err(MemoryError::NotFound(_))));
        assert!(matches!(store.delete("nope").await, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_changes_recall() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        let id = store.save("likes tea", None).await.unwrap();
        let mut meta = Map::new();
        meta.insert("source".into(), Value::from("chat"));
        store.update(&id, "likes coffee", Some(meta)).await.unwrap();

        let hits = store.recall("likes coffee", 1).await.unwrap();
        assert_eq!(hits[0].text, "likes coffee");
        assert_eq!(hits[0].metadata["source"], "chat");
    }

    #[tokio::test]
    async fn profile_roundtrip() {
        let store = InMemoryStore::new(HashingEmbedder::shared());
        assert_eq!(store.get_profile().await.unwrap(), None);
        store.set_profile("Name: Sam").await.unwrap();
        assert_eq!(store.get_profile().await.unwrap().as_deref(), Some("Name: Sam"));
    }
}
