//! Document feeder: the timer-driven ingestion loop.
//!
//! Each cycle scans the input folder, and for every new or modified file
//! runs extract → chunk → embed → replace-in-store, one file at a time.
//! A file that fails is logged and left unmarked so the next cycle retries
//! it; no failure ends the loop.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::responder::{BackendFactory, ConfiguredBackends};
use crate::embedding::EmbeddingProvider;
use crate::extract::{content_type_for_path, extract_text};
use crate::models::{ChunkRecord, Document};
use crate::store::VectorStore;
use crate::watcher::{FileEntry, Watcher};

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub scanned: usize,
    pub ingested: usize,
    pub skipped_unchanged: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

pub struct Feeder {
    watcher: Watcher,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    chunking: ChunkingConfig,
    batch_size: usize,
    max_file_bytes: u64,
    poll_interval: Duration,
}

impl Feeder {
    pub fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self> {
        Ok(Self {
            watcher: Watcher::new(&config.feeder)?,
            embedder,
            store,
            collection: config.vector_store.collection.clone(),
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size.max(1),
            max_file_bytes: config.feeder.max_file_bytes,
            poll_interval: Duration::from_secs(config.feeder.poll_interval_secs),
        })
    }

    /// Target a different collection than the configured one.
    pub fn with_collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    /// Create the collection if needed, sized to the embedder.
    pub async fn prepare(&self) -> Result<()> {
        self.store
            .ensure_collection(&self.collection, self.embedder.dims())
            .await
    }

    /// Ingest one file under the given source label. Returns the number of
    /// chunks written.
    pub async fn ingest_file(&self, path: &Path, source: &str) -> Result<usize> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if metadata.len() > self.max_file_bytes {
            bail!(
                "{} is {} bytes, larger than feeder.max_file_bytes ({})",
                path.display(),
                metadata.len(),
                self.max_file_bytes
            );
        }
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let document = read_document(path, source, modified_at)?;
        self.ingest_document(&document).await
    }

    /// Chunk, embed and store an already-extracted document. Existing points
    /// for the same source are removed first, so a shrunk document leaves
    /// no stale chunks behind.
    pub async fn ingest_document(&self, document: &Document) -> Result<usize> {
        let chunks = chunk_text(
            &document.source,
            &document.text,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );

        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .with_context(|| format!("Failed to embed {}", document.source))?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder returned {} vectors for {} chunks of {}",
                    vectors.len(),
                    batch.len(),
                    document.source
                );
            }
            records.extend(batch.iter().cloned().zip(vectors).map(|(chunk, vector)| {
                ChunkRecord {
                    chunk,
                    vector,
                    modified_at: document.modified_at,
                }
            }));
        }

        // Ids are stable per (source, chunk_index), so the upsert overwrites
        // the previous version in place and only the tail is left to prune.
        self.store.upsert(&self.collection, &records).await?;
        self.store
            .delete_stale(&self.collection, &document.source, records.len())
            .await?;

        tracing::info!(
            source = %document.source,
            content_type = %document.content_type,
            chunks = records.len(),
            collection = %self.collection,
            "ingested document"
        );
        Ok(records.len())
    }

    /// Run one poll cycle.
    pub async fn poll_once(&mut self) -> Result<CycleReport> {
        let entries = self.watcher.scan()?;
        let pending: Vec<FileEntry> = self
            .watcher
            .pending(&entries)
            .into_iter()
            .cloned()
            .collect();

        let mut report = CycleReport {
            scanned: entries.len(),
            skipped_unchanged: entries.len() - pending.len(),
            ..CycleReport::default()
        };

        for entry in &pending {
            match self.ingest_file(&entry.path, &entry.source).await {
                Ok(written) => {
                    self.watcher.mark_seen(entry);
                    report.ingested += 1;
                    report.chunks_written += written;
                }
                Err(e) => {
                    tracing::warn!(source = %entry.source, error = %format!("{:#}", e), "ingest failed, will retry next poll");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Poll until ctrl-c.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            input_dir = %self.watcher.root().display(),
            collection = %self.collection,
            interval_secs = self.poll_interval.as_secs(),
            "feeder started"
        );

        loop {
            if let Err(e) = self.prepare().await {
                tracing::error!(error = %format!("{:#}", e), "vector store not ready");
            } else {
                match self.poll_once().await {
                    Ok(report) if report.ingested > 0 || report.failed > 0 => {
                        tracing::info!(
                            scanned = report.scanned,
                            ingested = report.ingested,
                            failed = report.failed,
                            chunks = report.chunks_written,
                            "poll cycle finished"
                        );
                    }
                    Ok(report) => {
                        tracing::debug!(scanned = report.scanned, "no changes");
                    }
                    Err(e) => tracing::error!(error = %format!("{:#}", e), "poll cycle failed"),
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("feeder stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

/// `rag feed`: poll the input folder until ctrl-c, or once with `--once`.
pub async fn run_feed(config: &Config, once: bool) -> Result<()> {
    let backends = ConfiguredBackends::new(config);
    let mut feeder = Feeder::new(config, backends.embedder()?, backends.store()?)?;

    if !once {
        return feeder.run().await;
    }

    feeder.prepare().await?;
    let report = feeder.poll_once().await?;
    println!("feed {}", feeder.watcher().root().display());
    println!("  collection: {}", feeder.collection());
    println!("  files scanned: {}", report.scanned);
    println!("  ingested: {}", report.ingested);
    println!("  unchanged: {}", report.skipped_unchanged);
    println!("  failed: {}", report.failed);
    println!("  chunks written: {}", report.chunks_written);
    if report.failed > 0 {
        bail!("{} file(s) failed to ingest", report.failed);
    }
    println!("ok");
    Ok(())
}

/// `rag scan`: list the files the next feed cycle would process, with an
/// estimated chunk count. Touches neither the embedder nor the store.
pub fn run_scan(config: &Config) -> Result<()> {
    let watcher = Watcher::new(&config.feeder)?;
    let entries = watcher.scan()?;

    println!("scan {}", watcher.root().display());
    let mut total_chunks = 0usize;
    for entry in &entries {
        let estimate = match read_document(&entry.path, &entry.source, entry.modified_at) {
            Ok(doc) => {
                let n = chunk_text(
                    &doc.source,
                    &doc.text,
                    config.chunking.chunk_size,
                    config.chunking.chunk_overlap,
                )
                .len();
                total_chunks += n;
                n.to_string()
            }
            Err(e) => format!("error: {:#}", e),
        };
        println!("  {:<48} {:>10} bytes  {}", entry.source, entry.size, estimate);
    }
    println!("  files: {}", entries.len());
    println!("  estimated chunks: {}", total_chunks);
    Ok(())
}

/// `rag ingest`: feed one file, outside the poll loop. The path as given is
/// used as the source label.
pub async fn run_ingest(
    config: &Config,
    file: &Path,
    collection: Option<&str>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
) -> Result<()> {
    let chunking = ChunkingConfig {
        chunk_size: chunk_size.unwrap_or(config.chunking.chunk_size),
        chunk_overlap: chunk_overlap.unwrap_or(config.chunking.chunk_overlap),
    };
    if chunking.chunk_size == 0 {
        bail!("--chunk-size must be > 0");
    }
    if chunking.chunk_overlap >= chunking.chunk_size {
        bail!("--chunk-overlap must be smaller than --chunk-size");
    }
    if !file.is_file() {
        bail!("File not found: {}", file.display());
    }

    let backends = ConfiguredBackends::new(config);
    let mut feeder =
        Feeder::new(config, backends.embedder()?, backends.store()?)?.with_chunking(chunking);
    if let Some(collection) = collection {
        feeder = feeder.with_collection(collection);
    }

    feeder.prepare().await?;
    let source = file.to_string_lossy().replace('\\', "/");
    let written = feeder.ingest_file(file, &source).await?;

    println!("ingest {}", source);
    println!("  collection: {}", feeder.collection());
    println!("  chunks written: {}", written);
    println!("ok");
    Ok(())
}

/// `rag init`: make sure the configured collection exists and report the
/// store's health.
pub async fn run_init(config: &Config) -> Result<()> {
    let backends = ConfiguredBackends::new(config);
    let embedder = backends.embedder()?;
    let store = backends.store()?;
    let collection = &config.vector_store.collection;

    store
        .ensure_collection(collection, embedder.dims())
        .await
        .with_context(|| format!("Failed to prepare collection '{}'", collection))?;
    let health = store.health().await?;

    println!("collection {} ready ({} dims)", collection, embedder.dims());
    println!("  store: {} ({})", config.vector_store.backend, health);
    println!("  embedder: {}", embedder.model_name());
    Ok(())
}

/// Read and extract a file into a [`Document`].
pub fn read_document(path: &Path, source: &str, modified_at: DateTime<Utc>) -> Result<Document> {
    let content_type = content_type_for_path(path)
        .with_context(|| format!("Unsupported file type: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = extract_text(&bytes, content_type)
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;

    Ok(Document {
        path: path.to_path_buf(),
        source: source.to_string(),
        content_type: content_type.to_string(),
        text,
        modified_at,
    })
}
