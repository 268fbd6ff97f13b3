use crate::{
    types::{AppError, Result},
    AppState,
};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use std::path::{Component, Path as FsPath, PathBuf};

async fn read_file(path: &FsPath) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound("File not found on disk".to_string()),
        _ => AppError::Internal(format!("Failed to read {}: {}", path.display(), e)),
    })
}

/// Original document behind a passage
///
/// Looks up the passage, then serves the file at its stored path. PDFs are
/// served as `application/pdf`, HTML as `text/html`, everything else as
/// `text/plain`.
#[utoipa::path(
    get,
    path = "/pdfs/{id}",
    params(("id" = String, Path, description = "Passage id")),
    responses(
        (status = 200, description = "Raw document bytes"),
        (status = 404, description = "Unknown passage or file missing on disk")
    ),
    tag = "documents"
)]
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let record = state
        .retriever
        .get_record(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("Document ID not found".to_string()))?;

    let bytes = read_file(FsPath::new(&record.doc_path)).await?;
    tracing::debug!(id = %id, path = %record.doc_path, bytes = bytes.len(), "Serving document");

    Ok(([(header::CONTENT_TYPE, record.doc_type.content_type())], bytes))
}

/// Resolve `filename` to a single plain component under `root`.
pub fn resolve_source_path(root: &FsPath, filename: &str) -> Result<PathBuf> {
    let candidate = FsPath::new(filename);
    let mut components = candidate.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(root.join(candidate)),
        _ => Err(AppError::InvalidInput("Invalid filename".to_string())),
    }
}

/// File from the data directory
#[utoipa::path(
    get,
    path = "/sources/{filename}",
    params(("filename" = String, Path, description = "File name inside the data directory")),
    responses(
        (status = 200, description = "Raw file bytes"),
        (status = 400, description = "Path traversal or unsupported file type"),
        (status = 404, description = "File not found")
    ),
    tag = "documents"
)]
pub async fn get_source(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let path = resolve_source_path(&state.data_dir, &filename)?;
    let mime = mime_guess::from_path(&path)
        .first()
        .ok_or_else(|| AppError::InvalidInput("Unsupported file type".to_string()))?;

    // Symlinks must not lead out of the data directory.
    if let (Ok(real), Ok(root)) = (
        tokio::fs::canonicalize(&path).await,
        tokio::fs::canonicalize(&state.data_dir).await,
    ) {
        if !real.starts_with(&root) {
            return Err(AppError::InvalidInput("Invalid filename".to_string()));
        }
    }

    let bytes = read_file(&path).await?;
    Ok(([(header::CONTENT_TYPE, mime.essence_str().to_string())], bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("../etc/passwd")]
    #[case("..")]
    #[case("/etc/passwd")]
    #[case("a/b.txt")]
    #[case("")]
    #[case(".")]
    fn test_rejects_non_plain_names(#[case] name: &str) {
        assert!(matches!(
            resolve_source_path(FsPath::new("/data"), name),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_accepts_plain_name() {
        assert_eq!(
            resolve_source_path(FsPath::new("/data"), "report.pdf").unwrap(),
            PathBuf::from("/data/report.pdf")
        );
    }
}
