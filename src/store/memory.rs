//! In-memory [`VectorStore`] for tests and single-process demos.
//!
//! Collections are `HashMap`s of points behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every point in the collection.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{ChunkRecord, RetrievedChunk};

use super::VectorStore;

struct Collection {
    dims: usize,
    points: HashMap<String, ChunkRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total points across all collections.
    pub fn len(&self) -> usize {
        self.read()
            .map(|c| c.values().map(|coll| coll.points.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let mut collections = self.write()?;
        match collections.get(collection) {
            Some(existing) if existing.dims != dims => bail!(
                "collection '{}' exists with {} dims, expected {}",
                collection,
                existing.dims,
                dims
            ),
            Some(_) => {}
            None => {
                collections.insert(
                    collection.to_string(),
                    Collection {
                        dims,
                        points: HashMap::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<()> {
        let mut collections = self.write()?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| anyhow!("collection '{}' not found", collection))?;
        for record in records {
            if record.vector.len() != coll.dims {
                bail!(
                    "vector for chunk {} has {} dims, collection '{}' expects {}",
                    record.chunk.id,
                    record.vector.len(),
                    collection,
                    coll.dims
                );
            }
            coll.points.insert(record.chunk.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_stale(&self, collection: &str, source: &str, keep: usize) -> Result<()> {
        let keep = keep as i64;
        let mut collections = self.write()?;
        if let Some(coll) = collections.get_mut(collection) {
            coll.points
                .retain(|_, r| r.chunk.source != source || r.chunk.chunk_index < keep);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let collections = self.read()?;
        let coll = collections
            .get(collection)
            .ok_or_else(|| anyhow!("collection '{}' not found", collection))?;

        let mut hits: Vec<RetrievedChunk> = coll
            .points
            .values()
            .map(|r| RetrievedChunk {
                id: r.chunk.id.clone(),
                source: r.chunk.source.clone(),
                chunk_index: r.chunk.chunk_index,
                text: r.chunk.text.clone(),
                score: cosine_similarity(vector, &r.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count_source(&self, collection: &str, source: &str) -> Result<u64> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .map(|c| c.points.values().filter(|r| r.chunk.source == source).count() as u64)
            .unwrap_or(0))
    }

    async fn health(&self) -> Result<String> {
        let collections = self.read()?;
        Ok(format!("in-memory ({} collections)", collections.len()))
    }
}
