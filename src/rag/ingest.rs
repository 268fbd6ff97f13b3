//! Directory ingestion.
//!
//! Walks a tree, loads every supported file, chunks it and writes the
//! passages to the vector store. Each chunk carries a SHA-256 of its text; on
//! re-ingest any chunk whose hash is already stored for that document reuses
//! the stored embedding, so unchanged files cost no embedding calls. Passages
//! that no longer exist in the document are deleted.
//!
//! A file that cannot be loaded (not UTF-8, missing layout sidecar, I/O error)
//! is skipped and listed in the report. Embedding and store failures abort the
//! run since they affect every remaining file.

use crate::db::VectorStore;
use crate::rag::chunker::Chunker;
use crate::rag::embeddings::Embedder;
use crate::rag::loader::{self, LoadedDocument};
use crate::types::{AppError, Passage, PassageRecord, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// A file left out of the index and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFile {
    /// Path of the file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Files found under the root.
    pub files_seen: usize,
    /// Files that produced passages.
    pub files_indexed: usize,
    /// Files left out.
    pub skipped: Vec<SkippedFile>,
    /// Passages embedded during this run.
    pub passages_added: usize,
    /// Passages whose stored embedding was reused.
    pub passages_reused: usize,
    /// Stale passages deleted.
    pub passages_removed: usize,
    /// Wall time of the run.
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
struct FileOutcome {
    added: usize,
    reused: usize,
    removed: usize,
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Loads, chunks, embeds and stores documents.
pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    table: String,
    batch_size: usize,
}

impl Ingestor {
    /// Build an ingestor writing to `table`.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
        table: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunker,
            table: table.into(),
            batch_size: batch_size.max(1),
        }
    }

    /// Index `root` (a file or a directory tree). With `rebuild` the table is
    /// dropped first.
    pub async fn ingest_path(&self, root: &Path, rebuild: bool) -> Result<IngestReport> {
        let start = Instant::now();
        let root = tokio::fs::canonicalize(root).await.map_err(|e| {
            AppError::InvalidInput(format!("Cannot read {}: {}", root.display(), e))
        })?;

        self.prepare_table(rebuild).await?;

        let dir = root.clone();
        let discovery = tokio::task::spawn_blocking(move || loader::discover_files(&dir))
            .await
            .map_err(|e| AppError::Internal(format!("File discovery task failed: {}", e)))?;
        let files = discovery.files;

        tracing::info!(root = %root.display(), files = files.len(), table = %self.table, "Starting ingestion");

        let mut report = IngestReport {
            files_seen: files.len() + discovery.unreadable.len(),
            ..Default::default()
        };
        report.skipped.extend(
            discovery
                .unreadable
                .into_iter()
                .map(|(path, reason)| SkippedFile { path, reason }),
        );

        for path in files {
            match self.ingest_file(&path).await? {
                Ok(outcome) => {
                    report.files_indexed += 1;
                    report.passages_added += outcome.added;
                    report.passages_reused += outcome.reused;
                    report.passages_removed += outcome.removed;
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "Skipping file");
                    report.skipped.push(SkippedFile { path, reason });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            indexed = report.files_indexed,
            skipped = report.skipped.len(),
            added = report.passages_added,
            reused = report.passages_reused,
            removed = report.passages_removed,
            duration_ms = report.duration_ms,
            "Ingestion finished"
        );
        Ok(report)
    }

    async fn prepare_table(&self, rebuild: bool) -> Result<()> {
        let exists = self.store.table_exists(&self.table).await?;
        if exists && rebuild {
            tracing::info!(table = %self.table, "Dropping table for rebuild");
            self.store.drop_table(&self.table).await?;
        } else if exists {
            let stats = self.store.table_stats(&self.table).await?;
            if stats.dimensions != self.embedder.dimensions() {
                return Err(AppError::Configuration(format!(
                    "Table '{}' holds {}-dimensional vectors but the embedder produces {}; re-run with --rebuild",
                    self.table,
                    stats.dimensions,
                    self.embedder.dimensions()
                )));
            }
            return Ok(());
        }
        self.store
            .create_table(&self.table, self.embedder.dimensions())
            .await
    }

    /// Outer error aborts the run, inner error skips the file.
    async fn ingest_file(&self, path: &Path) -> Result<std::result::Result<FileOutcome, String>> {
        let (doc_type, loaded) = match loader::load_document(path).await {
            Ok(loaded) => loaded,
            Err(e) => return Ok(Err(e.to_string())),
        };

        let doc_path = path.to_string_lossy().into_owned();
        let passages = match &loaded {
            LoadedDocument::Text(text) => self.chunker.chunk_text(&doc_path, doc_type, text),
            LoadedDocument::Layout(doc) => self.chunker.chunk_document(&doc_path, doc_type, doc),
        };

        let existing = self.store.get_by_doc(&self.table, &doc_path).await?;
        if passages.is_empty() {
            self.remove_stale(&existing, &HashSet::new()).await?;
            return Ok(Err("no text content".to_string()));
        }

        let outcome = self.sync_passages(passages, existing).await?;
        tracing::debug!(
            path = %doc_path,
            added = outcome.added,
            reused = outcome.reused,
            removed = outcome.removed,
            "Indexed file"
        );
        Ok(Ok(outcome))
    }

    /// Bring the stored rows of one document in line with `passages`.
    async fn sync_passages(
        &self,
        passages: Vec<Passage>,
        existing: Vec<PassageRecord>,
    ) -> Result<FileOutcome> {
        let mut outcome = FileOutcome::default();

        let known: HashMap<&str, &[f32]> = existing
            .iter()
            .filter(|r| !r.content_hash.is_empty())
            .map(|r| (r.content_hash.as_str(), r.embedding.as_slice()))
            .collect();
        let by_id: HashMap<&str, &PassageRecord> =
            existing.iter().map(|r| (r.id.as_str(), r)).collect();

        let hashes: Vec<String> = passages.iter().map(|p| content_hash(&p.text)).collect();

        let mut to_embed: Vec<String> = Vec::new();
        for (passage, hash) in passages.iter().zip(&hashes) {
            if !known.contains_key(hash.as_str()) && !to_embed.contains(&passage.text) {
                to_embed.push(passage.text.clone());
            }
        }

        let mut fresh: HashMap<String, Vec<f32>> = HashMap::new();
        for batch in to_embed.chunks(self.batch_size) {
            let vectors = self.embedder.embed_batch(batch).await?;
            for (text, vector) in batch.iter().zip(vectors) {
                fresh.insert(content_hash(text), vector);
            }
        }
        outcome.added = fresh.len();

        let keep: HashSet<String> = passages.iter().map(|p| p.id.clone()).collect();
        let mut records = Vec::with_capacity(passages.len());
        for (passage, hash) in passages.into_iter().zip(hashes) {
            let embedding = match known.get(hash.as_str()) {
                Some(stored) => {
                    outcome.reused += 1;
                    stored.to_vec()
                }
                None => fresh.get(&hash).cloned().ok_or_else(|| {
                    AppError::Internal(format!("Missing embedding for {}", passage.id))
                })?,
            };
            let record = PassageRecord::from_passage(passage, embedding, hash);
            if by_id
                .get(record.id.as_str())
                .is_some_and(|old| same_content(old, &record))
            {
                continue;
            }
            records.push(record);
        }

        if !records.is_empty() {
            self.store.upsert(&self.table, &records).await?;
        }
        outcome.removed = self.remove_stale(&existing, &keep).await?;
        Ok(outcome)
    }

    async fn remove_stale(&self, existing: &[PassageRecord], keep: &HashSet<String>) -> Result<usize> {
        let stale: Vec<String> = existing
            .iter()
            .filter(|r| !keep.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        self.store.delete(&self.table, &stale).await
    }
}

/// Stored row equals the new one apart from its timestamp.
fn same_content(old: &PassageRecord, new: &PassageRecord) -> bool {
    old.content_hash == new.content_hash
        && old.chunk_index == new.chunk_index
        && old.doc_type == new.doc_type
        && old.page_number == new.page_number
        && old.bbox_left == new.bbox_left
        && old.bbox_top == new.bbox_top
        && old.bbox_right == new.bbox_right
        && old.bbox_bottom == new.bbox_bottom
}
