//! Token counting for chunk budgets.
//!
//! The chunker only needs one question answered: how many tokens does this
//! slice of text cost? [`TokenCounter`] abstracts that so the BPE tables used at
//! index time can match the embedding model's tokenizer.
//!
//! Backends:
//! - [`TiktokenCounter`] - OpenAI BPE encodings via `tiktoken-rs` (default `cl100k_base`)
//! - [`HfTokenCounter`] - a HuggingFace `tokenizer.json` (requires `hf-tokenizer` feature)

use crate::types::{AppError, Result};
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Default BPE encoding name.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;

    /// Human readable backend name, used in logs.
    fn name(&self) -> &str;
}

/// tiktoken BPE counter.
pub struct TiktokenCounter {
    bpe: CoreBPE,
    encoding: String,
}

impl TiktokenCounter {
    /// Load one of the bundled encodings by name.
    pub fn new(encoding: &str) -> Result<Self> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => {
                return Err(AppError::Configuration(format!(
                    "Unknown tiktoken encoding '{}'",
                    other
                )))
            }
        }
        .map_err(|e| AppError::Configuration(format!("Failed to load {}: {}", encoding, e)))?;

        Ok(Self {
            bpe,
            encoding: encoding.to_string(),
        })
    }

    /// The `cl100k_base` encoding.
    pub fn cl100k() -> Result<Self> {
        Self::new(DEFAULT_ENCODING)
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.encoding
    }
}

/// HuggingFace `tokenizer.json` counter.
#[cfg(feature = "hf-tokenizer")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
    name: String,
}

#[cfg(feature = "hf-tokenizer")]
impl HfTokenCounter {
    /// Load a HuggingFace `tokenizer.json`.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            AppError::Configuration(format!(
                "Failed to load tokenizer {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            tokenizer,
            name: path.display().to_string(),
        })
    }
}

#[cfg(feature = "hf-tokenizer")]
impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                // Overestimate so the budget still holds.
                tracing::warn!(error = %e, "tokenizer failed, falling back to byte length");
                text.len()
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build a counter from a config value.
///
/// A value ending in `.json` is treated as a HuggingFace tokenizer file, anything
/// else as a tiktoken encoding name.
pub fn build_token_counter(name: &str) -> Result<Arc<dyn TokenCounter>> {
    if name.ends_with(".json") {
        #[cfg(feature = "hf-tokenizer")]
        {
            return Ok(Arc::new(HfTokenCounter::from_file(std::path::Path::new(
                name,
            ))?));
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        {
            return Err(AppError::Configuration(format!(
                "Tokenizer file '{}' requires the 'hf-tokenizer' feature",
                name
            )));
        }
    }

    Ok(Arc::new(TiktokenCounter::new(name)?))
}
