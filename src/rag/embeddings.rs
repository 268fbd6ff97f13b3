//! Dense embedding backends.
//!
//! - [`OllamaEmbedder`] - `POST {base_url}/api/embed` (default)
//! - [`FastEmbedder`] - local ONNX models via fastembed (requires `local-embeddings` feature)
//!
//! Every backend checks that the vectors it returns have the configured
//! dimension, since a table rejects anything else.

use crate::rag::cache::CachedEmbedder;
use crate::types::{AppError, Result};
use crate::utils::toml_config::{EmbeddingConfig, EmbeddingProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| AppError::Embedding("Embedder returned no vectors".to_string()))
    }

    /// Length of every vector this embedder produces.
    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

fn check_output(model: &str, expected_len: usize, dims: usize, out: &[Vec<f32>]) -> Result<()> {
    if out.len() != expected_len {
        return Err(AppError::Embedding(format!(
            "Model '{}' returned {} vectors for {} inputs",
            model,
            out.len(),
            expected_len
        )));
    }
    if let Some(bad) = out.iter().find(|v| v.len() != dims) {
        return Err(AppError::Embedding(format!(
            "Model '{}' returned {} dimensions, expected {}",
            model,
            bad.len(),
            dims
        )));
    }
    Ok(())
}

// ============================================================================
// Ollama
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from an Ollama server.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Client for `<base_url>/api/embed`.
    pub fn new(base_url: &str, model: &str, dimensions: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Ollama embed request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Ollama embed returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Invalid Ollama embed response: {}", e)))?;

        check_output(&self.model, texts.len(), self.dimensions, &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// fastembed
// ============================================================================

/// Local ONNX embeddings. Inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings")]
pub struct FastEmbedder {
    model: Arc<parking_lot::Mutex<fastembed::TextEmbedding>>,
    name: String,
    dimensions: usize,
}

#[cfg(feature = "local-embeddings")]
impl FastEmbedder {
    /// Load a model by its fastembed code, e.g. `BAAI/bge-small-en-v1.5`.
    pub fn new(model_code: &str) -> Result<Self> {
        use fastembed::{InitOptions, TextEmbedding};

        let info = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| m.model_code == model_code)
            .ok_or_else(|| {
                AppError::Configuration(format!("Unsupported fastembed model '{}'", model_code))
            })?;

        let model = TextEmbedding::try_new(
            InitOptions::new(info.model.clone()).with_show_download_progress(true),
        )
        .map_err(|e| AppError::Embedding(format!("Failed to load {}: {}", model_code, e)))?;

        Ok(Self {
            model: Arc::new(parking_lot::Mutex::new(model)),
            name: model_code.to_string(),
            dimensions: info.dim,
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let input = texts.to_vec();
        let out = tokio::task::spawn_blocking(move || model.lock().embed(input, None))
            .await
            .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))?
            .map_err(|e| AppError::Embedding(format!("fastembed error: {}", e)))?;

        check_output(&self.name, texts.len(), self.dimensions, &out)?;
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Build the configured embedder, wrapped in the query cache when enabled.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match config.provider {
        EmbeddingProviderKind::Ollama => Arc::new(OllamaEmbedder::new(
            &config.base_url,
            &config.model,
            config.dimensions,
            Duration::from_secs(config.timeout_secs),
        )?),

        #[cfg(feature = "local-embeddings")]
        EmbeddingProviderKind::FastEmbed => {
            let embedder = FastEmbedder::new(&config.model)?;
            if embedder.dimensions() != config.dimensions {
                return Err(AppError::Configuration(format!(
                    "Model '{}' produces {} dimensions but embedding.dimensions is {}",
                    config.model,
                    embedder.dimensions(),
                    config.dimensions
                )));
            }
            Arc::new(embedder)
        }

        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProviderKind::FastEmbed => {
            return Err(AppError::Configuration(
                "FastEmbed provider requires the 'local-embeddings' feature".to_string(),
            ))
        }
    };

    tracing::info!(
        model = inner.model_name(),
        dimensions = inner.dimensions(),
        cache_size = config.cache_size,
        "Embedder ready"
    );

    if config.cache_size == 0 {
        return Ok(inner);
    }
    Ok(Arc::new(CachedEmbedder::new(inner, config.cache_size)))
}
