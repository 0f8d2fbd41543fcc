//! Test doubles shared by the integration tests. Nothing here touches the
//! network.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rag_relay::config::Config;
use rag_relay::embedding::EmbeddingProvider;
use rag_relay::llm::{ChatBackend, GenerateOptions, ServiceType};
use rag_relay::responder::BackendFactory;
use rag_relay::models::{ChunkRecord, RetrievedChunk};
use rag_relay::store::{InMemoryStore, VectorStore};

/// Words the fake embedder knows. Each word owns one dimension, so
/// similarity is just word overlap.
pub const VOCABULARY: &[&str] = &[
    "apple", "banana", "cherry", "warranty", "repair", "invoice", "payment", "rust", "python",
    "docker", "kubernetes", "garden",
];

/// Marker the fake embedder refuses to embed.
pub const POISON: &str = "poison";

/// Bag-of-words embedder over [`VOCABULARY`].
pub struct WordEmbedder {
    calls: Mutex<usize>,
}

impl WordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; VOCABULARY.len()];
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            let word = word.to_lowercase();
            if let Some(i) = VOCABULARY.iter().position(|w| *w == word) {
                v[i] += 1.0;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-bag"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        if texts.iter().any(|t| t.to_lowercase().contains(POISON)) {
            bail!("embedding service rejected the batch");
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Prefix of the keyword template written by [`write_templates`].
pub const KEYWORD_PROMPT_PREFIX: &str = "KEYWORDS FOR:";

/// Chat backend that answers keyword prompts with a fixed reply and echoes
/// every other prompt back inside `<answer>` tags.
pub struct EchoChat {
    keyword_reply: Mutex<String>,
    prompts: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl EchoChat {
    pub fn new(keyword_reply: &str) -> Self {
        Self {
            keyword_reply: Mutex::new(keyword_reply.to_string()),
            prompts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_keyword_reply(&self, reply: &str) {
        *self.keyword_reply.lock().unwrap() = reply.to_string();
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for EchoChat {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.failing.load(Ordering::SeqCst) {
            bail!("chat backend unavailable");
        }
        if prompt.starts_with(KEYWORD_PROMPT_PREFIX) {
            return Ok(self.keyword_reply.lock().unwrap().clone());
        }
        Ok(format!("Let me check.\n<answer>{}</answer>", prompt))
    }
}

/// Hands out the same fake backends for every request.
pub struct FakeBackends {
    pub chat: Arc<EchoChat>,
    pub embedder: Arc<WordEmbedder>,
    pub store: Arc<InMemoryStore>,
    pub services: Mutex<Vec<(ServiceType, String)>>,
}

impl FakeBackends {
    pub fn new(keyword_reply: &str) -> Self {
        Self {
            chat: Arc::new(EchoChat::new(keyword_reply)),
            embedder: Arc::new(WordEmbedder::new()),
            store: Arc::new(InMemoryStore::new()),
            services: Mutex::new(Vec::new()),
        }
    }
}

impl BackendFactory for FakeBackends {
    fn chat(&self, service: ServiceType, model: &str) -> Result<Arc<dyn ChatBackend>> {
        self.services
            .lock()
            .unwrap()
            .push((service, model.to_string()));
        Ok(self.chat.clone())
    }

    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(self.embedder.clone())
    }

    fn store(&self) -> Result<Arc<dyn VectorStore>> {
        Ok(self.store.clone())
    }
}

/// Write a keyword and a context template into `dir`.
pub fn write_templates(dir: &Path) -> (PathBuf, PathBuf) {
    let keyword = dir.join("keywords.md");
    let context = dir.join("context.md");
    fs::write(&keyword, format!("{} {{{{USER_QUERY}}}}", KEYWORD_PROMPT_PREFIX)).unwrap();
    fs::write(
        &context,
        "CONTEXT:\n{{CONTEXT}}\nQUESTION: {{USER_QUERY}}",
    )
    .unwrap();
    (keyword, context)
}

/// Configuration rooted in `dir`: `dir/input` as the input folder, templates
/// from [`write_templates`], in-memory store.
pub fn test_config(dir: &Path) -> Config {
    let input = dir.join("input");
    fs::create_dir_all(&input).unwrap();
    let (keyword, context) = write_templates(dir);

    let mut config = Config::default();
    config.feeder.input_dir = input;
    config.feeder.poll_interval_secs = 1;
    config.vector_store.backend = "memory".to_string();
    config.prompts.keyword_prompt_path = Some(keyword);
    config.prompts.context_prompt_path = Some(context);
    config
}

/// [`InMemoryStore`] whose upserts can be switched to fail.
pub struct FlakyStore {
    pub inner: InMemoryStore,
    fail_upserts: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            fail_upserts: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_upserts.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn ensure_collection(&self, collection: &str, dims: usize) -> Result<()> {
        self.inner.ensure_collection(collection, dims).await
    }

    async fn upsert(&self, collection: &str, records: &[ChunkRecord]) -> Result<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            bail!("vector store unavailable");
        }
        self.inner.upsert(collection, records).await
    }

    async fn delete_stale(&self, collection: &str, source: &str, keep: usize) -> Result<()> {
        self.inner.delete_stale(collection, source, keep).await
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        self.inner.search(collection, vector, limit).await
    }

    async fn count_source(&self, collection: &str, source: &str) -> Result<u64> {
        self.inner.count_source(collection, source).await
    }

    async fn health(&self) -> Result<String> {
        self.inner.health().await
    }
}
