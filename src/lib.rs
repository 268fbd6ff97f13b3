//! # Lexio - retrieval-augmented generation server
//!
//! Indexes document collections into token-bounded passages that keep page and
//! bounding-box provenance, retrieves them by semantic similarity and streams
//! grounded LLM answers over Server-Sent Events.
//!
//! ## Overview
//!
//! Lexio can be used in two ways:
//!
//! 1. **As a standalone server** - Run the `lexio-server` binary
//! 2. **As a library** - Embed the pipeline components in your own service
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use lexio::{AppState, LexioConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LexioConfig::load_or_default("lexio.toml")?;
//!     let state = AppState::from_config(config).await?;
//!     let app = lexio::api::routes::create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ollama` | Ollama chat streaming (default) |
//! | `local-embeddings` | fastembed ONNX embedding models |
//! | `hf-tokenizer` | HuggingFace `tokenizer.json` token counting |
//! | `swagger-ui` | Interactive API docs at `/swagger-ui` |
//!
//! ## Modules
//!
//! - [`api`] - REST/SSE handlers and routes
//! - [`db`] - Vector store abstraction (local directory, in-memory)
//! - [`llm`] - LLM client implementations
//! - [`rag`] - Chunking, embeddings, ingestion, retrieval and generation
//! - [`types`] - Common types and error handling
//! - [`utils`] - Configuration and logging

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Vector store backends.
pub mod db;
/// LLM provider clients and abstractions.
pub mod llm;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Core types (requests, responses, errors).
pub mod types;
/// Configuration and logging utilities.
pub mod utils;

// Re-export commonly used types
pub use db::{VectorStore, VectorStoreProvider};
pub use llm::{LLMClient, Provider};
pub use rag::embeddings::Embedder;
pub use rag::generation::StreamingGenerator;
pub use rag::retrieval::Retriever;
pub use types::{AppError, Result};
pub use utils::toml_config::LexioConfig;

use crate::rag::chunker::Chunker;
use crate::rag::ingest::Ingestor;
use crate::rag::tokenizer::build_token_counter;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<LexioConfig>,
    /// Query and ID retrieval over the configured table
    pub retriever: Arc<Retriever>,
    /// Streaming answer generation
    pub generator: Arc<StreamingGenerator>,
    /// Root that `/sources/{filename}` serves from
    pub data_dir: PathBuf,
}

impl AppState {
    /// Assemble state from already-built backends.
    pub fn new(
        config: LexioConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LLMClient>,
    ) -> Self {
        let retriever = Retriever::new(
            store,
            embedder,
            config.store.table.clone(),
            config.rag.top_k,
        );
        let generator = StreamingGenerator::new(
            llm,
            config.llm.system_prompt.clone(),
            config.llm.channel_capacity,
        );

        Self {
            data_dir: PathBuf::from(&config.rag.data_dir),
            retriever: Arc::new(retriever),
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }

    /// Build every backend named by `config`.
    pub async fn from_config(config: LexioConfig) -> Result<Self> {
        let store = config.store.provider().create_store().await?;
        let embedder = rag::embeddings::build_embedder(&config.embedding)?;
        let llm = config.llm.provider().create_client().await?;
        Ok(Self::new(config, store, embedder, llm))
    }
}

/// Build an [`Ingestor`] for the configured table.
pub fn build_ingestor(
    config: &LexioConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
) -> Result<Ingestor> {
    let counter = build_token_counter(&config.rag.tokenizer)?;
    let chunker = Chunker::new(config.rag.chunker_config(), counter)?;
    Ok(Ingestor::new(
        store,
        embedder,
        chunker,
        config.store.table.clone(),
        config.embedding.batch_size,
    ))
}
