//! Vector Store Abstraction Layer
//!
//! Passages and their embeddings live in named tables, one per corpus. The
//! [`VectorStore`] trait is the only way the rest of the crate touches them, so
//! the retrieval and ingestion paths can run against the persistent directory
//! store in production and the in-memory store in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       VectorStore Trait                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │ create_table │ upsert │ search │ get_by_ids │ delete_doc │ ... │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲                               ▲
//!     ┌──────┴──────┐                 ┌──────┴──────┐
//!     │    Local    │                 │  InMemory   │
//!     │ (default)   │                 │  (testing)  │
//!     └─────────────┘                 └─────────────┘
//! ```
//!
//! # Scores
//!
//! Every backend scores hits by cosine similarity: higher is better, range
//! `[-1, 1]`. Ties are broken by passage id so results are deterministic.
//!
//! # Example
//!
//! ```rust,ignore
//! use lexio::db::vectorstore::{VectorStore, VectorStoreProvider};
//!
//! let store = VectorStoreProvider::Local { path: "./.lexio/store".into() }
//!     .create_store()
//!     .await?;
//!
//! store.create_table("passages", 1024).await?;
//! store.upsert("passages", &records).await?;
//! let hits = store.search("passages", &query_embedding, 5).await?;
//! ```

use crate::types::{AppError, PassageRecord, Result, ScoredRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// ============================================================================
// Vector Store Provider Configuration
// ============================================================================

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum VectorStoreProvider {
    /// Directory of JSON table files, loaded into memory on open.
    Local {
        /// Directory holding `{table}.json` files.
        path: String,
    },

    /// In-memory vector store for testing.
    ///
    /// Data is not persisted and will be lost when the process exits.
    InMemory,
}

impl VectorStoreProvider {
    /// Open the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created or a table
    /// file fails to parse.
    pub async fn create_store(&self) -> Result<Arc<dyn VectorStore>> {
        match self {
            VectorStoreProvider::Local { path } => {
                let store = super::local::LocalVectorStore::open(path).await?;
                Ok(Arc::new(store))
            }
            VectorStoreProvider::InMemory => Ok(Arc::new(InMemoryVectorStore::new())),
        }
    }

    /// `LEXIO_STORE_PATH` selects the local store; otherwise in-memory.
    pub fn from_env() -> Self {
        match std::env::var("LEXIO_STORE_PATH") {
            Ok(path) if !path.trim().is_empty() => VectorStoreProvider::Local { path },
            _ => VectorStoreProvider::InMemory,
        }
    }
}

// ============================================================================
// Table Statistics
// ============================================================================

/// Statistics about a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStats {
    pub name: String,
    pub passage_count: usize,
    pub dimensions: usize,
    /// Number of distinct source documents.
    pub document_count: usize,
    pub distance_metric: String,
}

/// Summary row for [`VectorStore::list_tables`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub passage_count: usize,
    pub dimensions: usize,
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Abstract trait for vector table operations.
///
/// # Implementors
///
/// - `LocalVectorStore` - directory of JSON tables (default)
/// - `InMemoryVectorStore` - testing only
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Get the name of this vector store provider.
    fn provider_name(&self) -> &'static str;

    /// Create a table whose vectors all have `dimensions` components.
    ///
    /// # Errors
    ///
    /// Returns an error if the table already exists or the name is invalid.
    async fn create_table(&self, name: &str, dimensions: usize) -> Result<()>;

    /// Delete a table and all its rows.
    async fn drop_table(&self, name: &str) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    async fn table_exists(&self, name: &str) -> Result<bool>;

    async fn table_stats(&self, name: &str) -> Result<TableStats>;

    /// Insert or replace rows by id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any embedding's length differs from the
    /// table's dimension. Nothing is written in that case.
    async fn upsert(&self, table: &str, records: &[PassageRecord]) -> Result<usize>;

    /// Top-`limit` rows by cosine similarity to `embedding`, best first.
    async fn search(
        &self,
        table: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// Exact lookup. Results follow the order of `ids`; unknown ids are dropped.
    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<PassageRecord>>;

    /// All rows that came from `doc_path`, ordered by chunk index.
    async fn get_by_doc(&self, table: &str, doc_path: &str) -> Result<Vec<PassageRecord>>;

    /// Delete rows by id, returning how many existed.
    async fn delete(&self, table: &str, ids: &[String]) -> Result<usize>;

    async fn get(&self, table: &str, id: &str) -> Result<Option<PassageRecord>> {
        let mut found = self.get_by_ids(table, &[id.to_string()]).await?;
        Ok(found.pop())
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let stats = self.table_stats(table).await?;
        Ok(stats.passage_count)
    }
}

// ============================================================================
// Table data shared by the concrete stores
// ============================================================================

/// Rows of one table plus its fixed dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableData {
    pub name: String,
    pub dimensions: usize,
    pub records: BTreeMap<String, PassageRecord>,
}

impl TableData {
    pub fn new(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            records: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> TableInfo {
        TableInfo {
            name: self.name.clone(),
            passage_count: self.records.len(),
            dimensions: self.dimensions,
        }
    }

    pub fn stats(&self) -> TableStats {
        let mut docs: Vec<&str> = self.records.values().map(|r| r.doc_path.as_str()).collect();
        docs.sort_unstable();
        docs.dedup();

        TableStats {
            name: self.name.clone(),
            passage_count: self.records.len(),
            dimensions: self.dimensions,
            document_count: docs.len(),
            distance_metric: "cosine".to_string(),
        }
    }

    fn check_dimensions(&self, len: usize, what: &str) -> Result<()> {
        if len != self.dimensions {
            return Err(AppError::InvalidInput(format!(
                "{} has {} dimensions, table '{}' expects {}",
                what, len, self.name, self.dimensions
            )));
        }
        Ok(())
    }

    pub fn upsert(&mut self, records: &[PassageRecord]) -> Result<usize> {
        for record in records {
            self.check_dimensions(record.embedding.len(), &format!("Passage '{}'", record.id))?;
        }
        for record in records {
            self.records.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    pub fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<ScoredRecord>> {
        self.check_dimensions(embedding.len(), "Query embedding")?;

        let mut hits: Vec<(&PassageRecord, f32)> = self
            .records
            .values()
            .map(|r| (r, cosine_similarity(embedding, &r.embedding)))
            .collect();

        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .map(|(record, score)| ScoredRecord {
                record: record.clone(),
                score,
            })
            .collect())
    }

    pub fn get_by_ids(&self, ids: &[String]) -> Vec<PassageRecord> {
        ids.iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect()
    }

    pub fn get_by_doc(&self, doc_path: &str) -> Vec<PassageRecord> {
        let mut rows: Vec<PassageRecord> = self
            .records
            .values()
            .filter(|r| r.doc_path == doc_path)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.chunk_index);
        rows
    }

    pub fn delete(&mut self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.records.remove(id.as_str()).is_some())
            .count()
    }
}

/// Cosine similarity. Mismatched lengths or a zero vector score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Table names double as file names, so keep them to a safe alphabet.
pub(crate) fn validate_table_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "Invalid table name '{}': use letters, digits, '_' or '-'",
            name
        )))
    }
}

pub(crate) fn table_not_found(name: &str) -> AppError {
    AppError::NotFound(format!("Table '{}' not found", name))
}

// ============================================================================
// In-Memory Vector Store (for testing)
// ============================================================================

/// In-memory vector store for testing purposes.
///
/// Data is not persisted and will be lost when the process exits.
pub struct InMemoryVectorStore {
    tables: Arc<RwLock<HashMap<String, TableData>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn provider_name(&self) -> &'static str {
        "in-memory"
    }

    async fn create_table(&self, name: &str, dimensions: usize) -> Result<()> {
        validate_table_name(name)?;
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(AppError::InvalidInput(format!(
                "Table '{}' already exists",
                name
            )));
        }
        tables.insert(name.to_string(), TableData::new(name, dimensions));
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(name)
            .ok_or_else(|| table_not_found(name))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let mut tables: Vec<TableInfo> = self.tables.read().values().map(|t| t.info()).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.read().contains_key(name))
    }

    async fn table_stats(&self, name: &str) -> Result<TableStats> {
        let tables = self.tables.read();
        let table = tables.get(name).ok_or_else(|| table_not_found(name))?;
        Ok(table.stats())
    }

    async fn upsert(&self, table: &str, records: &[PassageRecord]) -> Result<usize> {
        let mut tables = self.tables.write();
        let data = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        data.upsert(records)
    }

    async fn search(
        &self,
        table: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let tables = self.tables.read();
        let data = tables.get(table).ok_or_else(|| table_not_found(table))?;
        data.search(embedding, limit)
    }

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<PassageRecord>> {
        let tables = self.tables.read();
        let data = tables.get(table).ok_or_else(|| table_not_found(table))?;
        Ok(data.get_by_ids(ids))
    }

    async fn get_by_doc(&self, table: &str, doc_path: &str) -> Result<Vec<PassageRecord>> {
        let tables = self.tables.read();
        let data = tables.get(table).ok_or_else(|| table_not_found(table))?;
        Ok(data.get_by_doc(doc_path))
    }

    async fn delete(&self, table: &str, ids: &[String]) -> Result<usize> {
        let mut tables = self.tables.write();
        let data = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        Ok(data.delete(ids))
    }
}

// ============================================================================
// Tests
// ============================================================================
