use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the store cannot be queried
    pub status: String,
    /// Server version
    pub version: String,
    /// Vector store backend
    pub store: String,
    /// Table queried by retrieval
    pub table: String,
    /// Passages currently indexed
    pub passages: usize,
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse)),
    tag = "operations"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.retriever.store();
    let table = state.retriever.table();

    let passages = match store.table_exists(table).await {
        Ok(true) => store.count(table).await,
        Ok(false) => Ok(0),
        Err(e) => Err(e),
    };

    let (status, passages) = match passages {
        Ok(n) => ("ok", n),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not query the store");
            ("degraded", 0)
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.provider_name().to_string(),
        table: table.to_string(),
        passages,
    })
}
