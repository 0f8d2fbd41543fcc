//! Contextual responder: retrieval-augmented answers.
//!
//! For a query the responder
//! 1. optionally asks the chat backend for search keywords (keyword template),
//! 2. embeds the keywords (or the raw query) and runs a top-K search,
//! 3. joins the returned chunk texts, in returned order, into the context,
//! 4. renders the context template and asks the chat backend for the answer.
//!
//! An empty search result is not an error: the context becomes
//! [`NO_CONTEXT`](crate::models::NO_CONTEXT) and the model is told so.
//!
//! A responder is built from an explicit [`ResponderConfig`]; the chat
//! backend, embedder and store come from a [`BackendFactory`], which lets
//! tests and the server swap them without global state.

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::{Config, EmbeddingConfig, LlmConfig, VectorStoreConfig};
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::llm::{create_backend, ChatBackend, GenerateOptions, ServiceType};
use crate::models::{Context, RetrievedChunk};
use crate::prompt::TemplateSet;
use crate::store::{create_store, VectorStore};

/// Everything that distinguishes one responder from another.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponderConfig {
    pub service: ServiceType,
    pub model_name: String,
    pub collection_name: String,
    pub keyword_prompt_path: PathBuf,
    pub context_prompt_path: PathBuf,
    pub num_chunks: usize,
    pub extract_keywords: bool,
    pub temperature: f32,
}

impl ResponderConfig {
    /// Defaults from the configuration file.
    pub fn from_config(config: &Config) -> Self {
        let (keyword_prompt_path, context_prompt_path) =
            TemplateSet::resolve_paths(&config.prompts, None, None);
        Self {
            service: config.llm.service,
            model_name: config.llm.default_model(config.llm.service).to_string(),
            collection_name: config.vector_store.collection.clone(),
            keyword_prompt_path,
            context_prompt_path,
            num_chunks: config.responder.num_chunks,
            extract_keywords: config.responder.extract_keywords,
            temperature: config.llm.temperature,
        }
    }

    /// Switch service. Without an explicit model the service's configured
    /// default model is used.
    pub fn with_service(mut self, service: ServiceType, model: Option<&str>, llm: &LlmConfig) -> Self {
        self.service = service;
        self.model_name = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| llm.default_model(service))
            .to_string();
        self
    }
}

/// Source of the backends a responder talks to.
pub trait BackendFactory: Send + Sync {
    fn chat(&self, service: ServiceType, model: &str) -> Result<Arc<dyn ChatBackend>>;
    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>>;
    fn store(&self) -> Result<Arc<dyn VectorStore>>;
}

/// Builds backends from the configuration file. The embedder and store are
/// created on first use and then shared, so every responder in a process
/// (and the in-memory store in particular) sees the same instances.
pub struct ConfiguredBackends {
    llm: LlmConfig,
    embedding: EmbeddingConfig,
    vector_store: VectorStoreConfig,
    embedder: Mutex<Option<Arc<dyn EmbeddingProvider>>>,
    store: Mutex<Option<Arc<dyn VectorStore>>>,
}

impl ConfiguredBackends {
    pub fn new(config: &Config) -> Self {
        Self {
            llm: config.llm.clone(),
            embedding: config.embedding.clone(),
            vector_store: config.vector_store.clone(),
            embedder: Mutex::new(None),
            store: Mutex::new(None),
        }
    }
}

impl BackendFactory for ConfiguredBackends {
    fn chat(&self, service: ServiceType, model: &str) -> Result<Arc<dyn ChatBackend>> {
        Ok(Arc::from(create_backend(service, Some(model), &self.llm)?))
    }

    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut slot = self
            .embedder
            .lock()
            .map_err(|_| anyhow!("embedder lock poisoned"))?;
        if let Some(embedder) = slot.as_ref() {
            return Ok(embedder.clone());
        }
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&self.embedding)?);
        *slot = Some(embedder.clone());
        Ok(embedder)
    }

    fn store(&self) -> Result<Arc<dyn VectorStore>> {
        let mut slot = self
            .store
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = create_store(&self.vector_store)?;
        *slot = Some(store.clone());
        Ok(store)
    }
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub num_chunks: usize,
    pub display_context: bool,
    pub extract_keywords: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub response: String,
    /// Context text sent to the model, when requested.
    pub context: Option<String>,
    pub keywords: Vec<String>,
    /// Distinct sources of the retrieved chunks, best match first.
    pub sources: Vec<String>,
    pub found_context: bool,
}

/// Patterns for pulling structured parts out of model replies.
struct ReplyPatterns {
    keywords: Regex,
    answer_tag: Regex,
    answer_label: Regex,
}

impl ReplyPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            keywords: Regex::new(r"(?s)<keywords>(.*?)</keywords>")?,
            answer_tag: Regex::new(r"(?s)<answer>(.*?)</answer>")?,
            answer_label: Regex::new(r"(?s)^\s*(?:Answer|Response|Antwort):\s*(.*)")?,
        })
    }

    /// Keywords from `<keywords>a, b</keywords>`, or from the whole reply
    /// split on commas when the tags are missing.
    fn keywords(&self, reply: &str) -> Vec<String> {
        let list = self
            .keywords
            .captures(reply)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(reply);
        list.split(',')
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
            .collect()
    }

    /// Answer text: `<answer>` tags first, then a leading `Answer:` label,
    /// otherwise the whole reply.
    fn answer(&self, reply: &str) -> String {
        for pattern in [&self.answer_tag, &self.answer_label] {
            if let Some(m) = pattern.captures(reply).and_then(|c| c.get(1)) {
                let text = m.as_str().trim();
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
        reply.trim().to_string()
    }
}

pub struct Responder {
    config: ResponderConfig,
    templates: TemplateSet,
    chat: Arc<dyn ChatBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    patterns: ReplyPatterns,
}

impl Responder {
    /// Load both templates from the configured paths and construct the
    /// backends. Template problems surface here, not at query time.
    pub fn new(config: ResponderConfig, factory: &dyn BackendFactory) -> Result<Self> {
        let templates = TemplateSet::load(&config.keyword_prompt_path, &config.context_prompt_path)?;
        Self::with_templates(config, templates, factory)
    }

    pub fn with_templates(
        config: ResponderConfig,
        templates: TemplateSet,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let chat = factory.chat(config.service, &config.model_name)?;
        let embedder = factory.embedder()?;
        let store = factory.store()?;
        tracing::info!(
            service = %config.service,
            model = %config.model_name,
            collection = %config.collection_name,
            "responder initialized"
        );
        Ok(Self {
            config,
            templates,
            chat,
            embedder,
            store,
            patterns: ReplyPatterns::new()?,
        })
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn default_options(&self) -> ResponseOptions {
        ResponseOptions {
            num_chunks: self.config.num_chunks,
            display_context: false,
            extract_keywords: self.config.extract_keywords,
        }
    }

    fn generate_options(&self) -> GenerateOptions {
        GenerateOptions {
            system: None,
            temperature: self.config.temperature,
        }
    }

    /// Ask the model for search keywords.
    pub async fn extract_keywords(&self, query: &str) -> Result<Vec<String>> {
        let prompt = self.templates.render_keywords(query);
        let reply = self.chat.generate(&prompt, &self.generate_options()).await?;
        let keywords = self.patterns.keywords(&reply);
        tracing::info!(?keywords, "extracted keywords");
        Ok(keywords)
    }

    /// Top-`k` chunks for `text`, in the order the store returned them.
    pub async fn retrieve(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        // Searching a collection the feeder has not created yet yields no
        // context rather than an error.
        self.store
            .ensure_collection(&self.config.collection_name, self.embedder.dims())
            .await?;
        let vector = embed_query(self.embedder.as_ref(), text).await?;
        let chunks = self
            .store
            .search(&self.config.collection_name, &vector, k)
            .await?;
        tracing::info!(
            collection = %self.config.collection_name,
            requested = k,
            found = chunks.len(),
            "retrieved chunks"
        );
        Ok(chunks)
    }

    /// Chunk texts joined by a blank line, in the given order.
    pub fn build_context(chunks: &[RetrievedChunk]) -> Context {
        if chunks.is_empty() {
            return Context::Empty;
        }
        Context::Found(
            chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    }

    pub async fn respond(
        &self,
        query: &str,
        options: &ResponseOptions,
    ) -> Result<RagAnswer, ResponderError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResponderError::EmptyQuery);
        }
        tracing::info!(query, "processing query");

        let keywords = if options.extract_keywords {
            self.extract_keywords(query).await?
        } else {
            Vec::new()
        };
        let search_text = if keywords.is_empty() {
            query.to_string()
        } else {
            keywords.join(" ")
        };

        let chunks = self.retrieve(&search_text, options.num_chunks.max(1)).await?;
        let context = Self::build_context(&chunks);
        if context.is_empty() {
            tracing::warn!("no relevant document chunks found");
        }

        let prompt = self
            .templates
            .render_context(context.as_prompt_text(), query);
        tracing::debug!(prompt = %prompt, "sending prompt");
        let reply = self.chat.generate(&prompt, &self.generate_options()).await?;

        let mut sources: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }

        Ok(RagAnswer {
            response: self.patterns.answer(&reply),
            context: options
                .display_context
                .then(|| context.as_prompt_text().to_string()),
            keywords,
            found_context: !context.is_empty(),
            sources,
        })
    }
}
