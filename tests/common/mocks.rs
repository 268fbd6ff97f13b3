//! Mock implementations for testing.
//!
//! Scripted LLM clients and a keyword embedder shared across the integration
//! suites, so no test needs a running model server.

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use lexio::llm::{LLMClient, LLMStream};
use lexio::rag::embeddings::Embedder;
use lexio::types::{AppError, DocType, Message, PassageRecord, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
enum Behaviour {
    Tokens,
    FailToStart,
    FailAfterTokens,
}

/// Mock LLM client that streams a fixed list of tokens.
///
/// Every conversation it receives is recorded so tests can inspect the
/// assembled prompt.
#[derive(Clone)]
pub struct MockLLMClient {
    tokens: Vec<String>,
    behaviour: Behaviour,
    seen: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLLMClient {
    /// Stream `tokens`, then finish.
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            behaviour: Behaviour::Tokens,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail before producing anything.
    pub fn failing() -> Self {
        Self {
            behaviour: Behaviour::FailToStart,
            ..Self::new(&[])
        }
    }

    /// Stream `tokens`, then fail.
    pub fn failing_after(tokens: &[&str]) -> Self {
        Self {
            behaviour: Behaviour::FailAfterTokens,
            ..Self::new(tokens)
        }
    }

    /// Conversations received so far.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl LLMClient for MockLLMClient {
    async fn stream_chat(&self, messages: &[Message]) -> Result<LLMStream> {
        self.seen.lock().push(messages.to_vec());

        let tokens = self.tokens.clone();
        match self.behaviour {
            Behaviour::FailToStart => Err(AppError::LLM("Mock LLM failure".to_string())),
            Behaviour::Tokens => Ok(Box::new(Box::pin(stream! {
                for token in tokens {
                    yield Ok(token);
                }
            }))),
            Behaviour::FailAfterTokens => Ok(Box::new(Box::pin(stream! {
                for token in tokens {
                    yield Ok(token);
                }
                yield Err(AppError::LLM("Mock stream broke".to_string()));
            }))),
        }
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}

/// Bag-of-keywords embedder: one dimension per vocabulary word plus a bias
/// dimension, so related texts score high and no vector is zero.
pub struct MockEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    /// Vector for `text` without counting a call.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|w| lower.matches(w.as_str()).count() as f32)
            .collect();
        v.push(0.1);
        v
    }

    /// Number of embedding requests made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded across all requests.
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

/// A stored row for `text` with the given id and path.
pub fn record(
    embedder: &MockEmbedder,
    id: &str,
    doc_path: &str,
    doc_type: DocType,
    text: &str,
) -> PassageRecord {
    PassageRecord {
        id: id.to_string(),
        doc_path: doc_path.to_string(),
        doc_type,
        chunk_index: 0,
        text: text.to_string(),
        embedding: embedder.vector(text),
        page_number: None,
        bbox_left: None,
        bbox_top: None,
        bbox_right: None,
        bbox_bottom: None,
        content_hash: String::new(),
        indexed_at: Utc::now(),
    }
}
