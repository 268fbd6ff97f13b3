//! LLM Provider Clients and Abstractions
//!
//! - [`LLMClient`] - The trait every model runtime implements
//! - [`Provider`] - Runtime selection, built from `[llm]` in `lexio.toml`
//!
//! # Supported Providers
//!
//! Enable providers via Cargo features:
//! - `ollama` (default) - Local Ollama server
//!
//! # Streaming
//!
//! Providers return a `Box<dyn Stream<Item = Result<String>> + Send + Unpin>`.
//! The streaming generator polls it from a worker task and drops it as soon as
//! the client goes away.

/// Core LLM client trait and provider selection.
pub mod client;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use client::{LLMClient, LLMStream, Provider};
