//! TOML-based configuration for lexio
//!
//! Everything tunable lives in `lexio.toml`. Every field has a default, so an
//! empty (or missing) file yields a working local setup: Ollama on
//! `localhost:11434`, a local store under `./.lexio/store`, documents served
//! from `./data`.
//!
//! Environment variables override the file after it is parsed:
//!
//! | Variable | Field |
//! |---|---|
//! | `LEXIO_HOST` | `server.host` |
//! | `LEXIO_PORT` | `server.port` |
//! | `LEXIO_LOG_LEVEL` | `server.log_level` |
//! | `OLLAMA_URL` | `llm.base_url`, `embedding.base_url` |
//! | `LEXIO_STORE_PATH` | `store.path` |
//! | `LEXIO_DATA_DIR` | `rag.data_dir` |

use crate::db::VectorStoreProvider;
use crate::llm::Provider;
use crate::rag::chunker::ChunkerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "lexio.toml";

/// Root configuration structure loaded from lexio.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexioConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding backend settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Chunking and retrieval settings.
    #[serde(default)]
    pub rag: RagConfig,
}

// ============= Server Configuration =============

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colored.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Request body limit in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

// ============= LLM Configuration =============

/// Supported chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Ollama `/api/chat`.
    #[default]
    Ollama,
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Backend.
    #[serde(default)]
    pub provider: LlmProviderKind,

    /// Backend base URL.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Prepended as a system message to every generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Capacity of the worker-to-response chunk channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_chat_model() -> String {
    "llama3.2".to_string()
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            base_url: default_ollama_url(),
            model: default_chat_model(),
            system_prompt: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl LlmConfig {
    /// Client-facing provider description.
    pub fn provider(&self) -> Provider {
        match self.provider {
            LlmProviderKind::Ollama => Provider::Ollama {
                base_url: self.base_url.clone(),
                model: self.model.clone(),
            },
        }
    }
}

// ============= Embedding Configuration =============

/// Supported embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Ollama `/api/embed`.
    #[default]
    Ollama,
    /// Local ONNX models (requires the `local-embeddings` feature).
    FastEmbed,
}

/// Embedding backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend.
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    /// Backend base URL (Ollama only).
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector length the model produces. Tables are created with it.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Number of query embeddings kept in the LRU cache. 0 disables caching.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Texts per embedding request during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "bge-m3".to_string()
}

fn default_dimensions() -> usize {
    1024
}

fn default_cache_size() -> usize {
    1024
}

fn default_batch_size() -> usize {
    32
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_ollama_url(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            cache_size: default_cache_size(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ============= Store Configuration =============

/// Vector store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON tables on disk.
    #[default]
    Local,
    /// Process memory only.
    InMemory,
}

/// Vector store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Directory for the local backend.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Table holding the passages.
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_store_path() -> String {
    "./.lexio/store".to_string()
}

fn default_table() -> String {
    "passages".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            table: default_table(),
        }
    }
}

impl StoreConfig {
    /// Provider description for the store factory.
    pub fn provider(&self) -> VectorStoreProvider {
        match self.backend {
            StoreBackend::Local => VectorStoreProvider::Local {
                path: self.path.clone(),
            },
            StoreBackend::InMemory => VectorStoreProvider::InMemory,
        }
    }
}

// ============= RAG Configuration =============

/// Chunking and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Hard per-passage token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Characters per token used for the first split estimate.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f32,

    /// Split attempts before falling back to a hard cut.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Overlap between neighbouring chunks, in tokens.
    #[serde(default)]
    pub chunk_overlap: usize,

    /// Passages returned per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// tiktoken encoding name, or a path to a HuggingFace `tokenizer.json`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,

    /// Root served by `/sources/{filename}`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_max_tokens() -> usize {
    512
}

fn default_chars_per_token() -> f32 {
    4.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_top_k() -> usize {
    5
}

fn default_tokenizer() -> String {
    crate::rag::tokenizer::DEFAULT_ENCODING.to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            chars_per_token: default_chars_per_token(),
            max_attempts: default_max_attempts(),
            chunk_overlap: 0,
            top_k: default_top_k(),
            tokenizer: default_tokenizer(),
            data_dir: default_data_dir(),
        }
    }
}

impl RagConfig {
    /// Chunker settings derived from this section.
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_tokens: self.max_tokens,
            chars_per_token: self.chars_per_token,
            max_attempts: self.max_attempts,
            overlap_tokens: self.chunk_overlap,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The file could not be read.
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    /// The file is not valid TOML.
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// The configuration could not be written back.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl LexioConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: LexioConfig = toml::from_str(&content)?;
        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults. Environment
    /// overrides are applied either way, then the result is validated.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str::<LexioConfig>(&content)?
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            LexioConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEXIO_*` / `OLLAMA_URL` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("LEXIO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("LEXIO_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid LEXIO_PORT"),
            }
        }
        if let Some(level) = get("LEXIO_LOG_LEVEL") {
            self.server.log_level = level;
        }
        if let Some(url) = get("OLLAMA_URL") {
            self.llm.base_url = url.clone();
            self.embedding.base_url = url;
        }
        if let Some(path) = get("LEXIO_STORE_PATH") {
            self.store.path = path;
        }
        if let Some(dir) = get("LEXIO_DATA_DIR") {
            self.rag.data_dir = dir;
        }
    }

    /// Validate the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.server.host.trim().is_empty() {
            return invalid("server.host must not be empty".into());
        }
        if self.server.max_body_bytes == 0 {
            return invalid("server.max_body_bytes must be greater than 0".into());
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model must not be empty".into());
        }
        if self.llm.channel_capacity == 0 {
            return invalid("llm.channel_capacity must be greater than 0".into());
        }
        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty".into());
        }
        if self.embedding.dimensions == 0 {
            return invalid("embedding.dimensions must be greater than 0".into());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be greater than 0".into());
        }
        if crate::db::vectorstore::validate_table_name(&self.store.table).is_err() {
            return invalid(format!(
                "store.table '{}' may only contain letters, digits, '_' or '-'",
                self.store.table
            ));
        }
        if self.rag.max_tokens < crate::rag::chunker::MIN_MAX_TOKENS {
            return invalid(format!(
                "rag.max_tokens must be at least {}",
                crate::rag::chunker::MIN_MAX_TOKENS
            ));
        }
        if !(self.rag.chars_per_token.is_finite() && self.rag.chars_per_token > 0.0) {
            return invalid("rag.chars_per_token must be a positive number".into());
        }
        if self.rag.max_attempts == 0 {
            return invalid("rag.max_attempts must be at least 1".into());
        }
        if self.rag.chunk_overlap >= self.rag.max_tokens {
            return invalid("rag.chunk_overlap must be smaller than rag.max_tokens".into());
        }
        if self.rag.top_k == 0 {
            return invalid("rag.top_k must be greater than 0".into());
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
