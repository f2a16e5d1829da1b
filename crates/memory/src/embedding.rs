//! Text embedders for similarity recall.
//!
//! [`FastEmbedder`] runs a local sentence-embedding model through `fastembed`.
//! The model is downloaded on first use and cached afterwards. Inference is
//! CPU-bound, so it runs on the blocking pool.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use toolbox_core::{Embedder, MemoryError};
use tracing::{debug, info};

/// Model names accepted by [`FastEmbedder::load`].
pub const EMBEDDING_MODELS: &[&str] = &["all-minilm-l6-v2", "bge-small-en-v1.5"];

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm-l6-v2";

fn model_kind(name: &str) -> Result<EmbeddingModel, MemoryError> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        other => Err(MemoryError::Embedding(format!(
            "unknown embedding model '{other}' (available: {})",
            EMBEDDING_MODELS.join(", ")
        ))),
    }
}

/// Sentence embeddings from a local ONNX model.
pub struct FastEmbedder {
    model: Arc<TextEmbedding>,
    model_name: String,
}

impl FastEmbedder {
    /// Load `model`, downloading it into `cache_dir` (or fastembed's default
    /// cache) when it is not cached yet.
    pub async fn load(model: &str, cache_dir: Option<PathBuf>) -> Result<Self, MemoryError> {
        let kind = model_kind(model)?;
        let mut options = InitOptions::new(kind).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }

        let embedding = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await
            .map_err(|e| MemoryError::Embedding(format!("model loader failed: {e}")))?
            .map_err(|e| MemoryError::Embedding(format!("Failed to initialize embedding model: {e}")))?;

        info!(model, "Embedding model loaded");
        Ok(Self {
            model: Arc::new(embedding),
            model_name: model.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        "fastembed"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        let batch = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || model.embed(batch, None))
            .await
            .map_err(|e| MemoryError::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| MemoryError::Embedding(format!("Batch embedding failed: {e}")))?;

        if vectors.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "Embedding count mismatch: {} embeddings vs {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        debug!(count = texts.len(), "Embedded texts");
        Ok(vectors)
    }
}

/// Deterministic embeddings by feature hashing, for tests that need a store
/// without a model download. Shared words and trigrams raise similarity;
/// meaning does not.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

#[cfg(any(test, feature = "test-util"))]
impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 512 }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// A default embedder behind the trait object stores take.
    pub fn shared() -> Arc<dyn Embedder> {
        Arc::new(Self::default())
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let words = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase);

        for word in words {
            v[self.bucket(word.as_bytes())] += 1.0;
            let padded: Vec<char> = format!("^{word}$").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                v[self.bucket(gram.as_bytes())] += 0.5;
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn bucket(&self, bytes: &[u8]) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in bytes {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dims as u64) as usize
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
