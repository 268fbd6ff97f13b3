use crate::{
    api::extract::{ApiJson, ApiQuery},
    types::{Result, RetrievalResult, RetrieveRequest},
    AppState,
};
use axum::{extract::State, Json};
use serde::Deserialize;
use utoipa::IntoParams;

/// Query string of `GET /retrieve`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct RetrieveParams {
    /// Free-text query
    pub query: String,
}

/// Top-K passages for a query (query string form)
#[utoipa::path(
    get,
    path = "/retrieve",
    params(RetrieveParams),
    responses(
        (status = 200, description = "Passages, best first", body = [RetrievalResult]),
        (status = 400, description = "Empty or missing query"),
        (status = 502, description = "Embedding backend failed")
    ),
    tag = "retrieval"
)]
pub async fn retrieve_get(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RetrieveParams>,
) -> Result<Json<Vec<RetrievalResult>>> {
    let results = state.retriever.search(&params.query).await?;
    Ok(Json(results))
}

/// Top-K passages for a query (JSON body form)
#[utoipa::path(
    post,
    path = "/retrieve",
    request_body = RetrieveRequest,
    responses(
        (status = 200, description = "Passages, best first", body = [RetrievalResult]),
        (status = 400, description = "Empty query"),
        (status = 502, description = "Embedding backend failed")
    ),
    tag = "retrieval"
)]
pub async fn retrieve_post(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RetrieveRequest>,
) -> Result<Json<Vec<RetrievalResult>>> {
    let results = state.retriever.search(&payload.query).await?;
    Ok(Json(results))
}
