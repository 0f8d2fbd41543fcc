//! Core data models used throughout the pipeline.
//!
//! Documents and chunks flow from the feeder into the vector store; retrieved
//! chunks and the assembled context flow from the store through the responder.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A source file observed by the watcher, with its extracted text.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// Stable label stored in every chunk's payload (`source` field).
    pub source: String,
    pub content_type: String,
    pub text: String,
    pub modified_at: DateTime<Utc>,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic UUID derived from `(source, chunk_index)`.
    pub id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex-encoded.
    pub hash: String,
}

/// A chunk paired with its embedding, ready for upsert.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub modified_at: DateTime<Utc>,
}

/// A chunk returned by a similarity search.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}

/// Marker substituted for `{{CONTEXT}}` when retrieval finds nothing.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// Retrieved text assembled for prompt substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    /// Chunk texts joined in retrieval order.
    Found(String),
    Empty,
}

impl Context {
    pub fn as_prompt_text(&self) -> &str {
        match self {
            Context::Found(text) => text,
            Context::Empty => NO_CONTEXT,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Context::Empty)
    }
}
