//! Query Embedding Cache
//!
//! Repeated questions (and the follow-up turns of a chat, which often re-ask
//! the same thing) should not pay for another embedding round trip.
//! [`CachedEmbedder`] wraps any [`Embedder`] and keeps the most recently used
//! single-text embeddings in an LRU.
//!
//! # Cache Key Strategy
//!
//! Keys are SHA-256 hashes of `text + "|" + model_name`, so switching models
//! never serves a vector from the wrong space.
//!
//! Batch calls (ingestion) pass straight through; passages are embedded once
//! and would only evict useful query entries.

use crate::rag::embeddings::Embedder;
use crate::types::Result;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries currently held.
    pub entry_count: usize,
    /// Maximum entries.
    pub capacity: usize,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Cache key for `text` embedded by `model`.
pub fn compute_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"|");
    hasher.update(model.as_bytes());
    hex::encode(hasher.finalize())
}

/// LRU-cached embedder decorator.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedEmbedder {
    /// Wrap `inner`, keeping up to `capacity` entries (at least one).
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(cap)),
            capacity: cap.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.lock().len(),
            capacity: self.capacity,
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = compute_key(text, self.inner.model_name());

        let cached = self.cache.lock().get(&key).cloned();
        if let Some(hit) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("query embedding cache hit");
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let embedding = self.inner.embed(text).await?;
        self.cache.lock().put(key, embedding.clone());
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn cached(capacity: usize) -> (Arc<CountingEmbedder>, CachedEmbedder) {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedEmbedder::new(inner.clone(), capacity);
        (inner, cache)
    }

    #[test]
    fn test_cache_key_computation() {
        let key1 = compute_key("hello world", "bge-small-en-v1.5");
        let key2 = compute_key("hello world", "bge-small-en-v1.5");
        let key3 = compute_key("hello world", "bge-base-en-v1.5");
        let key4 = compute_key("different text", "bge-small-en-v1.5");

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, key4);
        assert_eq!(key1.len(), 64);
    }

    #[tokio::test]
    async fn test_repeated_query_hits_cache() {
        let (inner, cache) = cached(8);

        let a = cache.embed("what is rag?").await.unwrap();
        let b = cache.embed("what is rag?").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let (inner, cache) = cached(2);

        cache.embed("one").await.unwrap();
        cache.embed("two").await.unwrap();
        cache.embed("one").await.unwrap(); // "two" is now least recent
        cache.embed("three").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);

        cache.embed("one").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        cache.embed("two").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_batches_bypass_cache() {
        let (inner, cache) = cached(8);
        let texts = vec!["a".to_string(), "b".to_string()];

        cache.embed_batch(&texts).await.unwrap();
        cache.embed_batch(&texts).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let (_inner, cache) = cached(4);
        cache.embed("x").await.unwrap();
        assert_eq!(cache.stats().entry_count, 1);
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
    }
}
