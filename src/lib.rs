//! # RAG Relay
//!
//! A folder-watching document feeder and a retrieval-augmented chat
//! responder over a vector store.
//!
//! The feeder polls an input folder, extracts text from new or modified
//! files, chunks and embeds it, and replaces the file's chunks in the vector
//! store. The responder turns a question into search keywords, retrieves the
//! closest chunks, and asks a chat model to answer from that context. Both
//! sides talk to Ollama or OpenAI; Qdrant is the store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Input folder│──▶│    Feeder     │──▶│  Qdrant  │
//! │  (watcher)  │   │ Extract+Chunk │   │ (store)  │
//! └─────────────┘   │    +Embed     │   └────┬─────┘
//!                   └──────────────┘        │
//!                                           ▼
//!                 ┌──────────┐       ┌─────────────┐      ┌──────────┐
//!                 │ CLI/HTTP │──────▶│  Responder  │─────▶│ Ollama / │
//!                 │  (rag)   │       │ kw→search→  │      │  OpenAI  │
//!                 └──────────┘       │   answer    │      └──────────┘
//!                                    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                              # create the collection
//! rag feed                              # poll ./storage/input forever
//! rag ask --query "What is the warranty period?"
//! rag serve                             # chat UI on http://127.0.0.1:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`prompt`] | Prompt templates |
//! | [`chunk`] | Text chunking |
//! | [`extract`] | Text extraction from PDF and Office files |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat backends |
//! | [`http`] | Retrying JSON client for backends |
//! | [`store`] | Vector store abstraction |
//! | [`watcher`] | Input folder scanning |
//! | [`feeder`] | Ingestion loop |
//! | [`responder`] | Retrieval-augmented answers |
//! | [`ask`] | Query-side CLI commands |
//! | [`server`] | HTTP API and web UI |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod feeder;
pub mod http;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod responder;
pub mod server;
pub mod store;
pub mod watcher;
