//! Document discovery and loading.
//!
//! Files are classified by extension. Plain text and markdown are read as
//! UTF-8, HTML is reduced to its visible text with `scraper`, and paged
//! documents (PDF and office formats) are read from a layout sidecar: a
//! `<file>.layout.json` written next to the document by an external layout
//! parser, holding pages and positioned text spans.

use crate::rag::bbox::{PageSize, RawRect};
use crate::types::DocType;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into.
pub const IGNORE_DIRECTORIES: &[&str] = &[
    ".venv",
    "node_modules",
    "converted_data",
    ".git",
    "__pycache__",
    "build",
    "dist",
    ".next",
    "venv",
    "env",
    ".lexio",
    "target",
];

/// File names never indexed.
pub const IGNORE_FILES: &[&str] = &["package-lock.json", "Cargo.lock", "LICENSE"];

/// Extensions processed directly as text.
pub const TEXT_FILE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "css", "html", "htm", "md", "markdown", "txt", "json", "yml",
    "yaml", "toml", "ini", "cfg", "conf", "sh", "bash", "env", "gitignore", "dockerignore", "sql",
    "graphql", "rs", "go", "java", "cpp", "hpp", "c", "h", "cs", "rb", "php",
];

/// Extensions that need a layout parser.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "odt", "ods", "odp", "epub", "rtf",
];

/// Suffix of the layout sidecar file.
pub const LAYOUT_SUFFIX: &str = ".layout.json";

/// How a file should be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Known text extension.
    Text,
    /// Paged document, needs a layout sidecar.
    Document,
    /// Unrecognised extension, tried as text.
    Unknown,
}

/// Decide how to read a file from its extension.
pub fn classify(path: &Path) -> FileKind {
    let ext = extension_of(path);
    if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Document
    } else if TEXT_FILE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Text
    } else {
        FileKind::Unknown
    }
}

/// Lowercased extension. Dotfiles such as `.gitignore` report their name.
fn extension_of(path: &Path) -> String {
    match path.extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy())
            .and_then(|n| n.strip_prefix('.').map(str::to_lowercase))
            .unwrap_or_default(),
    }
}

/// Path of the layout sidecar for `path`.
pub fn layout_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(LAYOUT_SUFFIX);
    PathBuf::from(name)
}

/// Whether `path` is a `<file>.layout.json` sidecar.
pub fn is_layout_sidecar(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(LAYOUT_SUFFIX))
        .unwrap_or(false)
}

/// Result of walking a directory tree.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Indexable files, sorted.
    pub files: Vec<PathBuf>,
    /// Entries that could not be read, with the reason.
    pub unreadable: Vec<(PathBuf, String)>,
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && entry.file_type().is_dir() && IGNORE_DIRECTORIES.contains(&&*name)
}

/// Recursively list indexable files under `root`, sorted for deterministic
/// ingestion order. Ignored directories, ignored files and layout sidecars are
/// skipped. Symlinks are followed; entries that cannot be read are collected
/// in [`Discovery::unreadable`] instead of ending the walk.
pub fn discover_files(root: &Path) -> Discovery {
    let mut discovery = Discovery::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                tracing::warn!(path = %path.display(), error = %e, "Cannot read entry");
                discovery.unreadable.push((path, e.to_string()));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if IGNORE_FILES.contains(&&*name) || is_layout_sidecar(entry.path()) {
            continue;
        }
        discovery.files.push(entry.into_path());
    }

    discovery.files.sort();
    discovery
}

// ============================================================================
// Layout documents
// ============================================================================

/// A positioned run of text on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    /// Span text.
    pub text: String,
    /// Span rectangle, if the parser produced one.
    #[serde(default)]
    pub bbox: Option<RawRect>,
}

/// One page of a layout document. `page_no` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPage {
    /// Page number.
    pub page_no: u32,
    /// Page width.
    #[serde(default)]
    pub width: f32,
    /// Page height.
    #[serde(default)]
    pub height: f32,
    /// Text runs in reading order.
    #[serde(default)]
    pub spans: Vec<TextSpan>,
}

impl ParsedPage {
    /// Page dimensions.
    pub fn size(&self) -> PageSize {
        PageSize {
            width: self.width,
            height: self.height,
        }
    }
}

/// Structured output of a layout parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Pages in order.
    pub pages: Vec<ParsedPage>,
}

/// Content of a loaded file, ready for chunking.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedDocument {
    /// Plain text.
    Text(String),
    /// Paged layout.
    Layout(ParsedDocument),
}

/// Why a file could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Bytes are not UTF-8.
    #[error("not valid UTF-8 text")]
    Decode,
    /// Paged document without its sidecar.
    #[error("no layout sidecar at {0}")]
    MissingLayout(PathBuf),
    /// Sidecar JSON did not parse.
    #[error("invalid layout sidecar: {0}")]
    Layout(#[from] serde_json::Error),
    /// Read failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Load `path` according to its classification.
pub async fn load_document(path: &Path) -> Result<(DocType, LoadedDocument), LoadError> {
    let doc_type = DocType::from_path(path);

    if classify(path) == FileKind::Document {
        let sidecar = layout_path(path);
        if !tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
            return Err(LoadError::MissingLayout(sidecar));
        }
        let raw = tokio::fs::read(&sidecar).await?;
        let parsed: ParsedDocument = serde_json::from_slice(&raw)?;
        return Ok((doc_type, LoadedDocument::Layout(parsed)));
    }

    let bytes = tokio::fs::read(path).await?;
    let text = String::from_utf8(bytes).map_err(|_| LoadError::Decode)?;

    let text = match doc_type {
        DocType::Html => html_to_text(&text),
        _ => text,
    };
    Ok((doc_type, LoadedDocument::Text(text)))
}

/// Visible text of an HTML document, one block per line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let skip = ["script", "style", "noscript", "template", "head"];
    let mut out = String::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map(|el| skip.contains(&el.name()))
                    .unwrap_or(false)
            });
            if hidden {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(trimmed);
            }
        }
    }
    out
}
