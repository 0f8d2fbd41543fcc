//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the collection-scoped surface the feeder
//! writes through and the responder reads through. Two implementations:
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | `qdrant` | [`QdrantStore`] | the external Qdrant service over gRPC |
//! | `memory` | [`InMemoryStore`] | tests and self-contained demos |
//!
//! Every point carries the payload `{source, text, chunk_index, hash, modified_at}`.

pub mod memory;
pub mod qdrant;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::VectorStoreConfig;
use crate::models::{ChunkRecord, RetrievedChunk};

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection with cosine distance if it does not exist yet.
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()>;

    /// Insert or overwrite points by chunk id.
    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<()>;

    /// Remove the points of `source` whose `chunk_index` is `keep` or
    /// higher. `keep == 0` removes the whole source.
    async fn delete_stale(&self, collection: &str, source: &str, keep: usize) -> Result<()>;

    /// Top-`limit` nearest chunks, best first.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    async fn count_source(&self, collection: &str, source: &str) -> Result<u64>;

    /// Short description of the backend's state, for `/health` and `rag init`.
    async fn health(&self) -> Result<String>;
}

/// Build the configured store.
pub fn create_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "qdrant" => Ok(Arc::new(QdrantStore::connect(&config.url)?)),
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        other => bail!("Unknown vector_store.backend: {}", other),
    }
}
