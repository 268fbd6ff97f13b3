//! Retrieval orchestration.
//!
//! A request either names passages explicitly (exact fetch, request order, no
//! scores) or carries a query (embed, top-K cosine search). Both paths end in
//! [`RetrievalResult`]s with highlight data attached when the stored record
//! has complete geometry.

use crate::db::VectorStore;
use crate::rag::embeddings::Embedder;
use crate::types::{AppError, PassageRecord, Result, RetrievalResult};
use std::sync::Arc;
use std::time::Instant;

/// What to retrieve.
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalRequest {
    /// Semantic search.
    Query(String),
    /// Exact fetch by passage id.
    Ids(Vec<String>),
}

/// Embeds queries and searches the passage table.
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    table: String,
    top_k: usize,
}

impl Retriever {
    /// Search `table` with `embedder`, returning up to `top_k` passages.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        table: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            table: table.into(),
            top_k,
        }
    }

    /// Table searched.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Passages returned per query.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Run a query or id lookup.
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<Vec<RetrievalResult>> {
        match request {
            RetrievalRequest::Query(query) => self.search(&query).await,
            RetrievalRequest::Ids(ids) => self.fetch_by_ids(&ids).await,
        }
    }

    /// Embed `query` and return the top-K passages, best first.
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("Query cannot be empty".to_string()));
        }
        if !self.store.table_exists(&self.table).await? {
            tracing::warn!(table = %self.table, "Search against missing table, nothing indexed yet");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let embedding = self.embedder.embed(query).await?;
        let hits = self.store.search(&self.table, &embedding, self.top_k).await?;

        tracing::info!(
            table = %self.table,
            top_k = self.top_k,
            results = hits.len(),
            best_score = hits.first().map(|h| h.score),
            duration_ms = start.elapsed().as_millis() as u64,
            "Semantic retrieval completed"
        );

        Ok(hits
            .iter()
            .map(|hit| RetrievalResult::from_record(&hit.record, Some(hit.score)))
            .collect())
    }

    /// Fetch passages by exact id, in request order. Unknown ids are dropped.
    pub async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RetrievalResult>> {
        if ids.is_empty() || !self.store.table_exists(&self.table).await? {
            return Ok(Vec::new());
        }

        let records = self.store.get_by_ids(&self.table, ids).await?;
        if records.len() < ids.len() {
            tracing::debug!(
                requested = ids.len(),
                found = records.len(),
                "Some requested passages do not exist"
            );
        }

        Ok(records
            .iter()
            .map(|record| RetrievalResult::from_record(record, None))
            .collect())
    }

    /// Raw stored row for `id`.
    pub async fn get_record(&self, id: &str) -> Result<Option<PassageRecord>> {
        if !self.store.table_exists(&self.table).await? {
            return Ok(None);
        }
        self.store.get(&self.table, id).await
    }
}

/// Join results into the reference block handed to the model.
pub fn build_context(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .map(|r| format!("[Document: {}]\n{}", r.doc_path, r.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryVectorStore;
    use crate::types::{BoundingBox, DocType, Passage, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps a text onto one of two axes by its first letter.
    struct AxisEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with('a') {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    async fn setup() -> (Arc<AxisEmbedder>, Retriever) {
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_table("passages", 2).await.unwrap();

        let pdf = PassageRecord::from_passage(
            Passage {
                id: "paper.pdf_0".to_string(),
                doc_path: "paper.pdf".to_string(),
                doc_type: DocType::Pdf,
                chunk_index: 0,
                text: "alpha facts".to_string(),
                page_number: Some(2),
                bbox: Some(BoundingBox {
                    left: 0.1,
                    top: 0.1,
                    right: 0.5,
                    bottom: 0.2,
                }),
            },
            vec![1.0, 0.0],
            String::new(),
        );
        let txt = PassageRecord::from_passage(
            Passage {
                id: "notes.txt_0".to_string(),
                doc_path: "notes.txt".to_string(),
                doc_type: DocType::Text,
                chunk_index: 0,
                text: "beta notes".to_string(),
                page_number: None,
                bbox: None,
            },
            vec![0.0, 1.0],
            String::new(),
        );
        store.upsert("passages", &[pdf, txt]).await.unwrap();

        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(store, embedder.clone(), "passages", 1);
        (embedder, retriever)
    }

    #[tokio::test]
    async fn test_query_returns_best_match_with_highlight() {
        let (_, retriever) = setup().await;
        let results = retriever
            .retrieve(RetrievalRequest::Query("about alpha".to_string()))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "paper.pdf_0");
        assert!(results[0].score.unwrap() > 0.99);
        match &results[0].source {
            SourceKind::Pdf { page, highlights } => {
                assert_eq!(*page, Some(2));
                assert_eq!(highlights.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected pdf source, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ids_skip_embedder_and_keep_order() {
        let (embedder, retriever) = setup().await;
        let results = retriever
            .retrieve(RetrievalRequest::Ids(vec![
                "notes.txt_0".to_string(),
                "ghost".to_string(),
                "paper.pdf_0".to_string(),
            ]))
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["notes.txt_0", "paper.pdf_0"]);
        assert!(results.iter().all(|r| r.score.is_none()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let (_, retriever) = setup().await;
        let err = retriever.search("   ").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_table_returns_nothing() {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(AxisEmbedder {
            calls: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(store, embedder, "passages", 5);
        assert!(retriever.search("anything").await.unwrap().is_empty());
        assert!(retriever.get_record("x").await.unwrap().is_none());
    }

    #[test]
    fn test_build_context_format() {
        let results = vec![
            RetrievalResult {
                id: "a_0".to_string(),
                doc_path: "a.md".to_string(),
                text: "first".to_string(),
                score: Some(0.9),
                source: SourceKind::Markdown,
            },
            RetrievalResult {
                id: "b_0".to_string(),
                doc_path: "b.txt".to_string(),
                text: "second".to_string(),
                score: None,
                source: SourceKind::Text,
            },
        ];
        assert_eq!(
            build_context(&results),
            "[Document: a.md]\nfirst\n\n[Document: b.txt]\nsecond"
        );
        assert_eq!(build_context(&[]), "");
    }
}
