//! LLM client abstraction.
//!
//! Generation only ever needs one capability from a model runtime: stream the
//! answer to a conversation token by token. [`LLMClient`] captures that so the
//! streaming generator can be driven by Ollama in production and by scripted
//! clients in tests.

use crate::types::{Message, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Incremental model output. Each item is one token (or token group) of text.
pub type LLMStream = Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>;

/// Generic LLM client trait for provider abstraction
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Start streaming a reply to `messages`.
    ///
    /// Dropping the returned stream must abort the underlying request.
    async fn stream_chat(&self, messages: &[Message]) -> Result<LLMStream>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    /// Ollama local LLM provider
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::Ollama {
    ///     base_url: "http://localhost:11434".to_string(),
    ///     model: "llama3.2".to_string(),
    /// };
    /// ```
    Ollama {
        /// Server URL
        base_url: String,
        /// Chat model name
        model: String,
    },
}

impl Provider {
    /// Create a client instance for this provider
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's feature is not compiled in or the
    /// base URL is unusable.
    pub async fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            #[cfg(feature = "ollama")]
            Provider::Ollama { base_url, model } => Ok(Arc::new(
                super::ollama::OllamaClient::new(base_url, model.clone())?,
            )),

            #[cfg(not(feature = "ollama"))]
            Provider::Ollama { .. } => Err(crate::types::AppError::Configuration(
                "Ollama provider requires the 'ollama' feature".to_string(),
            )),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Ollama { .. } => "Ollama",
        }
    }

    /// Model name.
    pub fn model(&self) -> &str {
        match self {
            Provider::Ollama { model, .. } => model,
        }
    }
}
