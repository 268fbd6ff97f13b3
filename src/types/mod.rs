use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

// ============= Conversation Types =============

/// A single chat message supplied by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    /// Who wrote the message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Build a message with an explicit role.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions that frame the conversation.
    System,
    /// The person asking.
    User,
    /// The model.
    Assistant,
}

/// Content of the most recent user message, if any.
pub fn latest_user_query(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
}

// ============= API Request Types =============

/// Body of `/retrieve`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrieveRequest {
    /// Natural-language search query.
    pub query: String,
}

/// Body of `/generate` and `/api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Conversation so far, oldest first.
    pub messages: Vec<Message>,
    /// Pin the context to these passage ids instead of searching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
}

/// Body of the combined retrieve-and-generate endpoint. Either a bare query or
/// a message history whose latest user message becomes the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RetrieveAndGenerateRequest {
    /// Search query. Takes precedence over `messages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Conversation whose latest user message is used as the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

// ============= Document Types =============

/// Kind of source document, derived from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Paged document read through a layout sidecar.
    Pdf,
    /// HTML reduced to visible text.
    Html,
    /// Markdown.
    Markdown,
    /// Any other UTF-8 text.
    Text,
}

impl DocType {
    /// Classify by file extension. Unknown extensions are plain text.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => DocType::Pdf,
            Some("html") | Some("htm") => DocType::Html,
            Some("md") | Some("markdown") => DocType::Markdown,
            _ => DocType::Text,
        }
    }

    /// Content type used when serving the raw document.
    pub fn content_type(&self) -> &'static str {
        match self {
            DocType::Pdf => "application/pdf",
            DocType::Html => "text/html",
            DocType::Markdown | DocType::Text => "text/plain",
        }
    }
}

/// Page-relative rectangle in top-left origin, each axis scaled to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoundingBox {
    /// Left edge.
    pub left: f32,
    /// Top edge.
    pub top: f32,
    /// Right edge.
    pub right: f32,
    /// Bottom edge.
    pub bottom: f32,
}

/// A bounded slice of a source document, ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    /// Stable id, `<doc_path>_<chunk_index>`.
    pub id: String,
    /// Source path relative to the ingested root.
    pub doc_path: String,
    /// Source kind.
    pub doc_type: DocType,
    /// Position of the passage within its document.
    pub chunk_index: usize,
    /// Passage text.
    pub text: String,
    /// 1-based page, for paged documents.
    pub page_number: Option<u32>,
    /// Union of the passage's span boxes.
    pub bbox: Option<BoundingBox>,
}

impl Passage {
    /// Deterministic passage id for a chunk of a document.
    pub fn make_id(doc_path: &str, chunk_index: usize) -> String {
        format!("{}_{}", doc_path, chunk_index)
    }
}

/// Row persisted by a vector store: a passage, its embedding and flat geometry columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    /// Passage id.
    pub id: String,
    /// Source path.
    pub doc_path: String,
    /// Source kind.
    pub doc_type: DocType,
    /// Position within the document.
    pub chunk_index: usize,
    /// Passage text.
    pub text: String,
    /// Dense embedding of `text`.
    pub embedding: Vec<f32>,
    /// 1-based page, for paged documents.
    #[serde(default)]
    pub page_number: Option<u32>,
    /// Normalized left edge.
    #[serde(default)]
    pub bbox_left: Option<f32>,
    /// Normalized top edge.
    #[serde(default)]
    pub bbox_top: Option<f32>,
    /// Normalized right edge.
    #[serde(default)]
    pub bbox_right: Option<f32>,
    /// Normalized bottom edge.
    #[serde(default)]
    pub bbox_bottom: Option<f32>,
    /// SHA-256 of the chunk text, used to skip re-embedding unchanged chunks.
    #[serde(default)]
    pub content_hash: String,
    /// When the row was written.
    pub indexed_at: DateTime<Utc>,
}

impl PassageRecord {
    /// Flatten a passage and its embedding into a storable row.
    pub fn from_passage(passage: Passage, embedding: Vec<f32>, content_hash: String) -> Self {
        let bbox = passage.bbox;
        Self {
            id: passage.id,
            doc_path: passage.doc_path,
            doc_type: passage.doc_type,
            chunk_index: passage.chunk_index,
            text: passage.text,
            embedding,
            page_number: passage.page_number,
            bbox_left: bbox.map(|b| b.left),
            bbox_top: bbox.map(|b| b.top),
            bbox_right: bbox.map(|b| b.right),
            bbox_bottom: bbox.map(|b| b.bottom),
            content_hash,
            indexed_at: Utc::now(),
        }
    }

    /// Highlight for this record, present only when page and all four box
    /// edges are set.
    pub fn highlight(&self) -> Option<Highlight> {
        match (
            self.page_number,
            self.bbox_left,
            self.bbox_top,
            self.bbox_right,
            self.bbox_bottom,
        ) {
            (Some(page), Some(l), Some(t), Some(r), Some(b)) => Some(Highlight {
                page,
                bbox: HighlightRect { l, t, r, b },
            }),
            _ => None,
        }
    }
}

/// A store hit: the record plus its cosine similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    /// Matched row.
    pub record: PassageRecord,
    /// Cosine similarity.
    pub score: f32,
}

// ============= Retrieval Types =============

/// Highlight rectangle in normalized top-left coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HighlightRect {
    /// Left.
    pub l: f32,
    /// Top.
    pub t: f32,
    /// Right.
    pub r: f32,
    /// Bottom.
    pub b: f32,
}

/// Region of a page to highlight in the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Highlight {
    /// 1-based page.
    pub page: u32,
    /// Rectangle on that page.
    pub bbox: HighlightRect,
}

/// Typed metadata per source type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceKind {
    /// Paged document with location data.
    Pdf {
        /// 1-based page.
        #[serde(skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
        /// Regions to highlight.
        #[serde(skip_serializing_if = "Option::is_none")]
        highlights: Option<Vec<Highlight>>,
    },
    /// HTML page.
    Html,
    /// Markdown file.
    Markdown,
    /// Plain text file.
    Text,
}

/// A passage returned to the client, with relevance and highlight data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RetrievalResult {
    /// Passage id, usable as a `source_ids` entry.
    pub id: String,
    /// Source path.
    pub doc_path: String,
    /// Passage text.
    pub text: String,
    /// Cosine similarity (higher is better). Absent for ID lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Type tag with per-type metadata.
    #[serde(flatten)]
    pub source: SourceKind,
}

impl RetrievalResult {
    /// Client view of a stored row.
    pub fn from_record(record: &PassageRecord, score: Option<f32>) -> Self {
        let source = match record.doc_type {
            DocType::Pdf => SourceKind::Pdf {
                page: record.page_number,
                highlights: record.highlight().map(|h| vec![h]),
            },
            DocType::Html => SourceKind::Html,
            DocType::Markdown => SourceKind::Markdown,
            DocType::Text => SourceKind::Text,
        };

        Self {
            id: record.id.clone(),
            doc_path: record.doc_path.clone(),
            text: record.text.clone(),
            score,
            source,
        }
    }

    /// Highlights, when the source is paged.
    pub fn highlights(&self) -> Option<&[Highlight]> {
        match &self.source {
            SourceKind::Pdf { highlights, .. } => highlights.as_deref(),
            _ => None,
        }
    }
}

// ============= Streaming Types =============

/// One event of a generation stream, serialized as the SSE `data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamChunk {
    /// Context passages, sent once before any token.
    Sources {
        /// Passages the answer is grounded on.
        sources: Vec<RetrievalResult>,
    },
    /// A piece of the answer.
    Token {
        /// Generated text.
        content: String,
        /// Set only on the terminal chunk.
        done: bool,
    },
    /// A failure reported inside the stream.
    Error {
        /// Error message.
        error: String,
    },
}

impl StreamChunk {
    /// A non-terminal token chunk.
    pub fn token(content: impl Into<String>) -> Self {
        StreamChunk::Token {
            content: content.into(),
            done: false,
        }
    }

    /// The terminal chunk: empty content, `done = true`.
    pub fn done() -> Self {
        StreamChunk::Token {
            content: String::new(),
            done: true,
        }
    }

    /// An in-band error. The stream still ends with [`StreamChunk::done`].
    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            error: message.into(),
        }
    }

    /// Whether this is the terminal chunk.
    pub fn is_done(&self) -> bool {
        matches!(self, StreamChunk::Token { done: true, .. })
    }
}

// ============= Error Types =============

/// Application error, rendered as `{"error": ..}` by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Vector store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Embedding backend failure.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Chat model failure.
    #[error("LLM error: {0}")]
    LLM(String),

    /// Missing table, record or file.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad client input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Database(msg) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Embedding(msg) => (axum::http::StatusCode::BAD_GATEWAY, msg),
            AppError::LLM(msg) => (axum::http::StatusCode::BAD_GATEWAY, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::Configuration(msg) => {
                (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::Internal(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(rejection: axum::extract::rejection::QueryRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

/// Result alias over [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
