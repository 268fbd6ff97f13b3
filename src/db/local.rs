//! Local directory vector store.
//!
//! Each table is a single `{table}.json` file under the store directory. All
//! tables are loaded into memory on open, searched by brute-force cosine
//! similarity, and rewritten after every mutation through a temp file and a
//! rename so a crash never leaves a half-written table behind.

use super::vectorstore::{
    table_not_found, validate_table_name, TableData, TableInfo, TableStats, VectorStore,
};
use crate::types::{AppError, PassageRecord, Result, ScoredRecord};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persistent store backed by a directory of JSON table files.
pub struct LocalVectorStore {
    dir: PathBuf,
    tables: Arc<RwLock<HashMap<String, TableData>>>,
    /// Serializes snapshot writes so an older snapshot never lands last.
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalVectorStore {
    /// Open (or create) the store at `path`, loading every table file in it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::Database(format!(
                "Failed to create store directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut tables = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| AppError::Database(format!("Failed to read store directory: {}", e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Database(format!("Failed to read store directory: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read(&path).await.map_err(|e| {
                AppError::Database(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let table: TableData = serde_json::from_slice(&data).map_err(|e| {
                AppError::Database(format!("Failed to parse {}: {}", path.display(), e))
            })?;
            tracing::debug!(
                table = %table.name,
                passages = table.records.len(),
                dimensions = table.dimensions,
                "Loaded table"
            );
            tables.insert(table.name.clone(), table);
        }

        tracing::info!(path = %dir.display(), tables = tables.len(), "Opened local vector store");

        Ok(Self {
            dir,
            tables: Arc::new(RwLock::new(tables)),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn table_file(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Write a serialized table snapshot atomically.
    async fn write_table(&self, name: &str, data: Vec<u8>) -> Result<()> {
        let target = self.table_file(name);
        let tmp = self.dir.join(format!(".{}.json.tmp", name));

        tokio::fs::write(&tmp, data).await.map_err(|e| {
            AppError::Database(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &target).await.map_err(|e| {
            AppError::Database(format!("Failed to replace {}: {}", target.display(), e))
        })?;
        Ok(())
    }

    fn serialize(data: &TableData) -> Result<Vec<u8>> {
        serde_json::to_vec(data).map_err(|e| {
            AppError::Internal(format!("Failed to serialize table '{}': {}", data.name, e))
        })
    }

    /// Apply `mutate` to a copy of a table, persist it, then publish it.
    ///
    /// Memory only changes once the file is written, so a failed write leaves
    /// both untouched.
    async fn mutate<T>(
        &self,
        table: &str,
        mutate: impl FnOnce(&mut TableData) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock().await;

        let mut data = self
            .tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| table_not_found(table))?;
        let out = mutate(&mut data)?;

        self.write_table(table, Self::serialize(&data)?).await?;
        self.tables.write().insert(table.to_string(), data);
        Ok(out)
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    fn provider_name(&self) -> &'static str {
        "local"
    }

    async fn create_table(&self, name: &str, dimensions: usize) -> Result<()> {
        validate_table_name(name)?;
        let _guard = self.write_lock.lock().await;

        if self.tables.read().contains_key(name) {
            return Err(AppError::InvalidInput(format!(
                "Table '{}' already exists",
                name
            )));
        }
        let data = TableData::new(name, dimensions);
        self.write_table(name, Self::serialize(&data)?).await?;
        self.tables.write().insert(name.to_string(), data);
        tracing::info!(table = name, dimensions, "Created table");
        Ok(())
    }

    async fn drop_table(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.tables.read().contains_key(name) {
            return Err(table_not_found(name));
        }

        let file = self.table_file(name);
        if tokio::fs::try_exists(&file).await.unwrap_or(false) {
            tokio::fs::remove_file(&file).await.map_err(|e| {
                AppError::Database(format!("Failed to remove {}: {}", file.display(), e))
            })?;
        }
        self.tables.write().remove(name);
        tracing::info!(table = name, "Dropped table");
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
        if records.is_empty() {
            return Ok(0);
        }
        self.mutate(table, |data| data.upsert(records)).await
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
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(table, |data| Ok(data.delete(ids))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, DocType, Passage};
    use tempfile::TempDir;

    fn record(id: &str, embedding: Vec<f32>) -> PassageRecord {
        PassageRecord::from_passage(
            Passage {
                id: id.to_string(),
                doc_path: "paper.pdf".to_string(),
                doc_type: DocType::Pdf,
                chunk_index: 0,
                text: "content".to_string(),
                page_number: Some(1),
                bbox: Some(BoundingBox {
                    left: 0.1,
                    top: 0.2,
                    right: 0.3,
                    bottom: 0.4,
                }),
            },
            embedding,
            "h".to_string(),
        )
    }

    #[tokio::test]
    async fn test_tables_survive_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = LocalVectorStore::open(dir.path()).await.unwrap();
            store.create_table("passages", 2).await.unwrap();
            store
                .upsert("passages", &[record("a", vec![1.0, 0.0])])
                .await
                .unwrap();
        }

        assert!(dir.path().join("passages.json").exists());

        let store = LocalVectorStore::open(dir.path()).await.unwrap();
        assert!(store.table_exists("passages").await.unwrap());
        let row = store.get("passages", "a").await.unwrap().unwrap();
        assert_eq!(row.page_number, Some(1));
        assert_eq!(row.bbox_left, Some(0.1));
        assert!(row.highlight().is_some());

        let hits = store.search("passages", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(dir.path()).await.unwrap();
        store.create_table("t", 1).await.unwrap();
        store.upsert("t", &[record("a", vec![1.0])]).await.unwrap();
        store.delete("t", &["a".to_string()]).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["t.json"]);
    }

    #[tokio::test]
    async fn test_drop_table_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(dir.path()).await.unwrap();
        store.create_table("t", 1).await.unwrap();
        store.drop_table("t").await.unwrap();

        assert!(!dir.path().join("t.json").exists());
        assert!(store.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upsert_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let store = LocalVectorStore::open(dir.path()).await.unwrap();
        store.create_table("t", 3).await.unwrap();
        assert!(store.upsert("t", &[record("a", vec![1.0])]).await.is_err());

        let reopened = LocalVectorStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let store = LocalVectorStore::open(&root).await.unwrap();
        store.create_table("t", 2).await.unwrap();
        store.upsert("t", &[record("a", vec![1.0, 0.0])]).await.unwrap();

        std::fs::remove_dir_all(&root).unwrap();

        let err = store
            .upsert("t", &[record("b", vec![0.0, 1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(store.count("t").await.unwrap(), 1);
        assert!(store.get("t", "b").await.unwrap().is_none());

        let err = store.delete("t", &["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
        assert!(store.get("t", "a").await.unwrap().is_some());

        assert!(store.create_table("u", 2).await.is_err());
        assert!(!store.table_exists("u").await.unwrap());
    }
}
