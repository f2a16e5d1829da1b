//! Memory store implementations for Toolbox.

pub mod embedding;
pub mod file_backend;
pub mod in_memory;
mod index;
pub mod vector;

#[cfg(any(test, feature = "test-util"))]
pub use embedding::HashingEmbedder;
pub use embedding::{DEFAULT_EMBEDDING_MODEL, EMBEDDING_MODELS, FastEmbedder};
pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use vector::{cosine_similarity, vector_search};
