//! Memory trait: persistent free-text memories plus a singleton user profile.
//!
//! Recall is similarity search and therefore approximate: callers may rely
//! on a saved text being recoverable by its own content, not on exact ranking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MemoryError;

/// A single stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A recall result, best match first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub score: f32,
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (for tests and ephemeral sessions) and
/// file-backed JSONL. Stores are shared across sessions and guard their
/// own consistency.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Store a memory and return its id.
    async fn save(&self, text: &str, metadata: Option<Map<String, Value>>) -> Result<String, MemoryError>;

    /// Top `k` memories by similarity to `query`.
    async fn recall(&self, query: &str, k: usize) -> Result<Vec<MemoryHit>, MemoryError>;

    /// Replace a memory's text; metadata is replaced only when given.
    async fn update(
        &self,
        id: &str,
        text: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), MemoryError>;

    async fn delete(&self, id: &str) -> Result<(), MemoryError>;

    /// Every stored memory, oldest first.
    async fn list(&self) -> Result<Vec<MemoryRecord>, MemoryError>;

    /// The user profile, or `None` if none was ever set.
    async fn get_profile(&self) -> Result<Option<String>, MemoryError>;

    async fn set_profile(&self, text: &str) -> Result<(), MemoryError>;
}

/// Turns text into vectors for similarity recall.
///
/// Stores embed every record on save and the query on recall, so all vectors
/// of one store must come from the same embedder.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// The embedder name (e.g., "fastembed").
    fn name(&self) -> &str;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| MemoryError::Embedding(format!("{} returned no vector", self.name())))
    }
}
