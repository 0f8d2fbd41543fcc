//! Query-side CLI commands: `rag ask`, `rag keywords`, `rag find`, `rag chat`.
//!
//! Each command builds its backends from the configuration and prints a
//! plain-text result to stdout.

use anyhow::{bail, Result};
use futures_util::StreamExt;
use std::io::Write;

use crate::config::Config;
use crate::embedding::embed_query;
use crate::llm::{create_backend, GenerateOptions, ServiceType};
use crate::responder::{BackendFactory, ConfiguredBackends, Responder, ResponderConfig};

/// Command-line overrides for `rag ask`.
#[derive(Debug, Default, Clone)]
pub struct AskArgs {
    pub service: Option<ServiceType>,
    pub model: Option<String>,
    pub collection: Option<String>,
    pub num_chunks: Option<usize>,
    pub display_context: bool,
    pub no_keywords: bool,
}

fn responder_config(cfg: &Config, args: &AskArgs) -> ResponderConfig {
    let mut config = ResponderConfig::from_config(cfg);
    let service = args.service.unwrap_or(cfg.llm.service);
    config = config.with_service(service, args.model.as_deref(), &cfg.llm);
    if let Some(collection) = &args.collection {
        config.collection_name = collection.clone();
    }
    if let Some(n) = args.num_chunks {
        config.num_chunks = n;
    }
    if args.no_keywords {
        config.extract_keywords = false;
    }
    config
}

pub async fn run_ask(cfg: &Config, query: &str, args: &AskArgs) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    if args.num_chunks == Some(0) {
        bail!("--num-chunks must be >= 1");
    }

    let backends = ConfiguredBackends::new(cfg);
    let responder = Responder::new(responder_config(cfg, args), &backends)?;
    let mut options = responder.default_options();
    options.display_context = args.display_context || cfg.responder.display_context;

    let answer = responder.respond(query, &options).await?;

    println!("\nQuery: {}", query);
    if !answer.keywords.is_empty() {
        println!("Keywords: {}", answer.keywords.join(", "));
    }
    if let Some(context) = &answer.context {
        println!("\nContext:\n{}\n{}\n{}", "-".repeat(80), context, "-".repeat(80));
    }
    println!("\nResponse:\n{}", answer.response);
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            println!("  - {}", source);
        }
    }
    Ok(())
}

pub async fn run_keywords(cfg: &Config, query: &str, args: &AskArgs) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let backends = ConfiguredBackends::new(cfg);
    let responder = Responder::new(responder_config(cfg, args), &backends)?;
    let keywords = responder.extract_keywords(query).await?;
    if keywords.is_empty() {
        println!("No keywords extracted.");
    } else {
        println!("{}", keywords.join(", "));
    }
    Ok(())
}

/// Search with a comma-separated keyword list, without asking a model.
pub async fn run_find(
    cfg: &Config,
    keywords: &str,
    collection: Option<&str>,
    num_chunks: usize,
) -> Result<()> {
    let terms: Vec<&str> = keywords
        .split(',')
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if terms.is_empty() {
        bail!("--keywords must contain at least one keyword");
    }
    if num_chunks == 0 {
        bail!("--num-chunks must be >= 1");
    }

    let collection = collection.unwrap_or(cfg.vector_store.collection.as_str());
    let backends = ConfiguredBackends::new(cfg);
    let embedder = backends.embedder()?;
    let store = backends.store()?;
    store.ensure_collection(collection, embedder.dims()).await?;
    let vector = embed_query(embedder.as_ref(), &terms.join(" ")).await?;
    let chunks = store.search(collection, &vector, num_chunks).await?;

    println!("\nKeywords: {}", terms.join(", "));
    println!("Retrieved {} document chunks:", chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        println!(
            "\nChunk {} ({} #{}, score {:.3}):\n{}",
            i + 1,
            chunk.source,
            chunk.chunk_index,
            chunk.score,
            chunk.text
        );
    }
    Ok(())
}

/// Send one prompt straight to the chat backend. With `stream`, fragments
/// are printed as they arrive.
pub async fn run_chat(
    cfg: &Config,
    prompt: &str,
    service: Option<ServiceType>,
    model: Option<&str>,
    system: Option<String>,
    temperature: Option<f32>,
    stream: bool,
) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let temperature = temperature.unwrap_or(cfg.llm.temperature);
    if !(0.0..=2.0).contains(&temperature) {
        bail!("--temperature must be in [0.0, 2.0]");
    }
    let backend = create_backend(service.unwrap_or(cfg.llm.service), model, &cfg.llm)?;
    let options = GenerateOptions { system, temperature };

    if !stream {
        let reply = backend.generate(prompt, &options).await?;
        println!("{}", reply);
        return Ok(());
    }

    let mut tokens = backend.generate_stream(prompt, &options).await?;
    let mut stdout = std::io::stdout();
    while let Some(token) = tokens.next().await {
        let token = token?;
        stdout.write_all(token.as_bytes())?;
        stdout.flush()?;
    }
    println!();
    Ok(())
}
