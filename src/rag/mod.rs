//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! # Module Structure
//!
//! - [`rag::loader`](crate::rag::loader) - File discovery, text/HTML loading, layout sidecars
//! - [`rag::tokenizer`](crate::rag::tokenizer) - Token counting (tiktoken, HuggingFace)
//! - [`rag::bbox`](crate::rag::bbox) - Bounding-box normalization
//! - [`rag::chunker`](crate::rag::chunker) - Token-bounded chunking with page/bbox provenance
//! - [`rag::embeddings`](crate::rag::embeddings) - Dense embedding backends (Ollama, fastembed)
//! - [`rag::cache`](crate::rag::cache) - LRU cache for query embeddings
//! - [`rag::ingest`](crate::rag::ingest) - Directory ingestion with content-hash dedup
//! - [`rag::retrieval`](crate::rag::retrieval) - Query or ID retrieval
//! - [`rag::generation`](crate::rag::generation) - Streamed answer generation
//!
//! # RAG Pipeline
//!
//! 1. **Ingestion** - Files are loaded, chunked and embedded
//! 2. **Storage** - Passages and embeddings are written to the vector store
//! 3. **Retrieval** - The query is embedded and the top-K passages fetched
//! 4. **Generation** - The LLM answers from the retrieved context, token by token
//!
//! # Example
//!
//! ```ignore
//! use lexio::rag::{retrieval::Retriever, generation::StreamingGenerator};
//!
//! let results = retriever.search("what is a bounding box?").await?;
//! let mut stream = generator.stream(&messages, results, true)?;
//! while let Some(chunk) = stream.next().await {
//!     println!("{:?}", chunk);
//! }
//! ```

pub mod bbox;
pub mod cache;
pub mod chunker;
pub mod embeddings;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod retrieval;
pub mod tokenizer;
