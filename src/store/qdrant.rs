//! [`VectorStore`] backed by a Qdrant service, reached over gRPC with
//! `qdrant-client`.
//!
//! Collections use cosine distance. Point ids are the chunk UUIDs, so an
//! upsert of an already-ingested chunk overwrites the existing point.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vectors_config::Config as VectorsConfigKind,
    CollectionInfo, Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointId, PointStruct, Range, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;

use crate::models::{ChunkRecord, RetrievedChunk};

use super::VectorStore;

pub struct QdrantStore {
    client: Qdrant,
    url: String,
}

impl QdrantStore {
    /// Build a client for `url` (e.g. `http://localhost:6334`). `QDRANT_API_KEY`
    /// is sent when set. No request is made until the first operation.
    pub fn connect(url: &str) -> Result<Self> {
        let api_key = std::env::var("QDRANT_API_KEY").ok();
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .with_context(|| format!("Failed to create Qdrant client for {}", url))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

fn source_filter(source: &str) -> Filter {
    Filter::must([Condition::matches("source", source.to_string())])
}

/// Points of `source` with `chunk_index >= keep`.
fn stale_filter(source: &str, keep: usize) -> Filter {
    Filter::must([
        Condition::matches("source", source.to_string()),
        Condition::range(
            "chunk_index",
            Range {
                gte: Some(keep as f64),
                ..Default::default()
            },
        ),
    ])
}

fn record_payload(record: &ChunkRecord) -> Result<Payload> {
    let json = serde_json::json!({
        "source": record.chunk.source,
        "text": record.chunk.text,
        "chunk_index": record.chunk.chunk_index,
        "hash": record.chunk.hash,
        "modified_at": record.modified_at.to_rfc3339(),
    });
    Payload::try_from(json).context("Failed to build Qdrant payload")
}

/// Size of the collection's unnamed vector, if it has one.
fn collection_dims(info: &CollectionInfo) -> Option<u64> {
    let vectors = info
        .config
        .as_ref()?
        .params
        .as_ref()?
        .vectors_config
        .as_ref()?;
    match vectors.config.as_ref()? {
        VectorsConfigKind::Params(params) => Some(params.size),
        VectorsConfigKind::ParamsMap(_) => None,
    }
}

fn point_id_string(id: Option<&PointId>) -> String {
    match id.and_then(|p| p.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> String {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn payload_int(payload: &HashMap<String, Value>, key: &str) -> i64 {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => *n,
        Some(Kind::DoubleValue(d)) => *d as i64,
        _ => 0,
    }
}

fn to_retrieved(point: ScoredPoint) -> RetrievedChunk {
    RetrievedChunk {
        id: point_id_string(point.id.as_ref()),
        source: payload_str(&point.payload, "source"),
        chunk_index: payload_int(&point.payload, "chunk_index"),
        text: payload_str(&point.payload, "text"),
        score: point.score,
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(collection)
            .await
            .with_context(|| format!("Failed to reach Qdrant at {}", self.url))?;
        if exists {
            let info = self
                .client
                .collection_info(collection)
                .await
                .with_context(|| format!("Failed to read collection info: {}", collection))?;
            match info.result.as_ref().and_then(collection_dims) {
                Some(size) if size != dims as u64 => bail!(
                    "collection '{}' exists with {} dims, expected {}",
                    collection,
                    size,
                    dims
                ),
                Some(_) => {}
                None => tracing::warn!(collection, "could not read collection vector size"),
            }
            return Ok(());
        }

        tracing::info!(collection, dims, "creating Qdrant collection");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(dims as u64, Distance::Cosine)),
            )
            .await
            .with_context(|| format!("Failed to create collection: {}", collection))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let points = records
            .iter()
            .map(|r| {
                Ok(PointStruct::new(
                    r.chunk.id.clone(),
                    r.vector.clone(),
                    record_payload(r)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, points).wait(true))
            .await
            .with_context(|| format!("Failed to upsert points into {}", collection))?;
        Ok(())
    }

    async fn delete_stale(&self, collection: &str, source: &str, keep: usize) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(stale_filter(source, keep))
                    .wait(true),
            )
            .await
            .with_context(|| format!("Failed to delete points for {}", source))?;
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(collection, vector.to_vec(), limit as u64)
                    .with_payload(true),
            )
            .await
            .with_context(|| format!("Failed to search collection {}", collection))?;

        Ok(response.result.into_iter().map(to_retrieved).collect())
    }

    async fn count_source(&self, collection: &str, source: &str) -> Result<u64> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(collection)
                    .filter(source_filter(source))
                    .exact(true),
            )
            .await
            .with_context(|| format!("Failed to count points for {}", source))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn health(&self) -> Result<String> {
        let reply = self
            .client
            .health_check()
            .await
            .with_context(|| format!("Qdrant unreachable at {}", self.url))?;
        Ok(format!("{} {}", reply.title, reply.version))
    }
}
