//! # RAG Relay CLI (`rag`)
//!
//! The `rag` binary runs the document feeder, answers questions from the
//! command line, and starts the HTTP chat server.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create the vector collection if it does not exist |
//! | `rag feed` | Poll the input folder and ingest new or modified files |
//! | `rag scan` | List the files the feeder would process |
//! | `rag ingest --file <path>` | Ingest a single file |
//! | `rag ask --query "<text>"` | Answer a question from the indexed documents |
//! | `rag keywords --query "<text>"` | Show the search keywords for a question |
//! | `rag find --keywords "a, b"` | Show the chunks a keyword search returns |
//! | `rag chat --prompt "<text>"` | Send a prompt straight to the chat model |
//! | `rag serve` | Start the HTTP API and web UI |
//!
//! ## Examples
//!
//! ```bash
//! # Feed once and exit
//! rag feed --once
//!
//! # Ask through OpenAI instead of the configured service
//! rag ask --service openai --query "How do I reset the device?"
//!
//! # Stream a reply token by token
//! rag chat --stream --prompt "Write a haiku about rust"
//!
//! # Verbose logs
//! RUST_LOG=rag_relay=debug rag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rag_relay::ask::{self, AskArgs};
use rag_relay::llm::ServiceType;
use rag_relay::{config, feeder, server};

/// RAG Relay: feed a folder of documents into a vector store and answer
/// questions from it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example. A missing file
/// means built-in defaults.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Relay: folder feeder and retrieval-augmented chat over Qdrant",
    version,
    long_about = "RAG Relay polls an input folder, chunks and embeds new or modified documents \
    into a vector store, and answers questions from the retrieved context through Ollama or \
    OpenAI, on the command line or over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rag.toml`. Built-in defaults are used when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the configured collection, sized to the embedding model.
    ///
    /// Idempotent. Also reports the vector store's health.
    Init,

    /// Poll the input folder and ingest new or modified files.
    ///
    /// Runs until ctrl-c. A file that fails is logged and retried on the
    /// next poll.
    Feed {
        /// Run a single poll cycle, print a summary and exit.
        #[arg(long)]
        once: bool,
    },

    /// List the files under the input folder with an estimated chunk count.
    ///
    /// Does not contact the embedding model or the vector store.
    Scan,

    /// Ingest a single file.
    Ingest {
        /// File to ingest. The path as given becomes the source label.
        #[arg(long)]
        file: PathBuf,

        /// Target collection (defaults to `[vector_store].collection`).
        #[arg(long)]
        collection: Option<String>,

        /// Chunk size in characters.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Characters shared between consecutive chunks.
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        /// The question.
        #[arg(long)]
        query: String,

        #[command(flatten)]
        target: Target,

        /// Number of chunks to retrieve.
        #[arg(long)]
        num_chunks: Option<usize>,

        /// Print the retrieved context before the answer.
        #[arg(long)]
        display_context: bool,

        /// Search with the raw question instead of extracted keywords.
        #[arg(long)]
        no_keywords: bool,
    },

    /// Show the search keywords the model extracts from a question.
    Keywords {
        /// The question.
        #[arg(long)]
        query: String,

        #[command(flatten)]
        target: Target,
    },

    /// Search with a comma-separated keyword list and print the chunks.
    Find {
        /// Keywords, e.g. `"warranty, repair"`.
        #[arg(long)]
        keywords: String,

        /// Collection to search (defaults to `[vector_store].collection`).
        #[arg(long)]
        collection: Option<String>,

        /// Number of chunks to return.
        #[arg(long, default_value_t = 3)]
        num_chunks: usize,
    },

    /// Send one prompt straight to the chat model, without retrieval.
    Chat {
        /// The prompt.
        #[arg(long)]
        prompt: String,

        /// Chat service to use.
        #[arg(long, value_enum)]
        service: Option<ServiceType>,

        /// Model name (defaults to the service's configured model).
        #[arg(long)]
        model: Option<String>,

        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,

        /// Sampling temperature in `[0.0, 2.0]`.
        #[arg(long)]
        temperature: Option<f32>,

        /// Print the reply as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP API and web UI.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Service, model and collection overrides shared by the query commands.
#[derive(clap::Args)]
struct Target {
    /// Chat service to use.
    #[arg(long, value_enum)]
    service: Option<ServiceType>,

    /// Model name (defaults to the service's configured model).
    #[arg(long)]
    model: Option<String>,

    /// Collection to search (defaults to `[vector_store].collection`).
    #[arg(long)]
    collection: Option<String>,
}

impl Target {
    fn into_args(self) -> AskArgs {
        AskArgs {
            service: self.service,
            model: self.model,
            collection: self.collection,
            ..AskArgs::default()
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            feeder::run_init(&cfg).await?;
        }
        Commands::Feed { once } => {
            feeder::run_feed(&cfg, once).await?;
        }
        Commands::Scan => {
            feeder::run_scan(&cfg)?;
        }
        Commands::Ingest {
            file,
            collection,
            chunk_size,
            chunk_overlap,
        } => {
            feeder::run_ingest(&cfg, &file, collection.as_deref(), chunk_size, chunk_overlap)
                .await?;
        }
        Commands::Ask {
            query,
            target,
            num_chunks,
            display_context,
            no_keywords,
        } => {
            let args = AskArgs {
                num_chunks,
                display_context,
                no_keywords,
                ..target.into_args()
            };
            ask::run_ask(&cfg, &query, &args).await?;
        }
        Commands::Keywords { query, target } => {
            ask::run_keywords(&cfg, &query, &target.into_args()).await?;
        }
        Commands::Find {
            keywords,
            collection,
            num_chunks,
        } => {
            ask::run_find(&cfg, &keywords, collection.as_deref(), num_chunks).await?;
        }
        Commands::Chat {
            prompt,
            service,
            model,
            system,
            temperature,
            stream,
        } => {
            ask::run_chat(
                &cfg,
                &prompt,
                service,
                model.as_deref(),
                system,
                temperature,
                stream,
            )
            .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
