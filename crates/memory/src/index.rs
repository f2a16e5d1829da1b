//! The record list plus embeddings shared by every store.
//!
//! Vectors are computed by the owning store's embedder before the index is
//! locked; the index itself only stores and searches them.

use chrono::Utc;
use serde_json::{Map, Value};
use toolbox_core::{MemoryError, MemoryHit, MemoryRecord};
use tracing::debug;
use uuid::Uuid;

use crate::vector::vector_search;

#[derive(Debug, Default)]
pub(crate) struct MemoryIndex {
    records: Vec<MemoryRecord>,
    embeddings: Vec<Vec<f32>>,
}

impl MemoryIndex {
    /// `embeddings[i]` must be the vector of `records[i]`.
    pub(crate) fn from_records(records: Vec<MemoryRecord>, embeddings: Vec<Vec<f32>>) -> Result<Self, MemoryError> {
        if records.len() != embeddings.len() {
            return Err(MemoryError::Embedding(format!(
                "{} records but {} embeddings",
                records.len(),
                embeddings.len()
            )));
        }
        Ok(Self { records, embeddings })
    }

    /// Saving text that is already stored returns the existing id.
    pub(crate) fn save(&mut self, text: &str, metadata: Option<Map<String, Value>>, embedding: Vec<f32>) -> String {
        if let Some(existing) = self.records.iter().find(|r| r.text == text) {
            debug!(id = %existing.id, "Memory already stored");
            return existing.id.clone();
        }

        let now = Utc::now();
        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            metadata: metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        let id = record.id.clone();
        self.embeddings.push(embedding);
        self.records.push(record);
        id
    }

    pub(crate) fn update(
        &mut self,
        id: &str,
        text: &str,
        metadata: Option<Map<String, Value>>,
        embedding: Vec<f32>,
    ) -> Result<(), MemoryError> {
        let pos = self.position(id)?;
        let record = &mut self.records[pos];
        record.text = text.to_string();
        if let Some(metadata) = metadata {
            record.metadata = metadata;
        }
        record.updated_at = Utc::now();
        self.embeddings[pos] = embedding;
        Ok(())
    }

    pub(crate) fn delete(&mut self, id: &str) -> Result<(), MemoryError> {
        let pos = self.position(id)?;
        self.records.remove(pos);
        self.embeddings.remove(pos);
        Ok(())
    }

    pub(crate) fn recall(&self, query_embedding: &[f32], k: usize) -> Vec<MemoryHit> {
        let candidates = self.records.iter().zip(&self.embeddings).map(|(r, e)| {
            (
                MemoryHit {
                    id: r.id.clone(),
                    text: r.text.clone(),
                    metadata: r.metadata.clone(),
                    score: 0.0,
                },
                e.as_slice(),
            )
        });
        vector_search(candidates, query_embedding, k)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    fn position(&self, id: &str) -> Result<usize, MemoryError> {
        self.records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))
    }
}
