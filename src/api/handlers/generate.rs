//! Streaming generation endpoints.
//!
//! All of them resolve the grounding passages first, so a bad request or an
//! unreachable embedder is reported with a normal JSON error before the SSE
//! response starts. Failures after that point arrive as an `{error}` event.

use crate::{
    api::extract::{ApiJson, ApiQuery},
    rag::generation::ChunkStream,
    types::{
        latest_user_query, AppError, GenerateRequest, Message, Result, RetrievalResult,
        RetrieveAndGenerateRequest,
    },
    AppState,
};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
};
use futures::{stream::BoxStream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use utoipa::IntoParams;

/// SSE body shared by every generation endpoint.
pub type EventStream =
    Sse<KeepAliveStream<BoxStream<'static, std::result::Result<Event, Infallible>>>>;

/// Query string of `GET /generate`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct GenerateParams {
    /// JSON array of `{role, content}` messages
    pub messages: String,
}

/// Query string of `GET /retrieve-and-generate`.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct RetrieveAndGenerateParams {
    /// Free-text question
    pub query: Option<String>,
    /// JSON array of `{role, content}` messages; the latest user turn is the query
    pub messages: Option<String>,
}

/// Where the context for an answer comes from.
enum Grounding {
    None,
    Ids(Vec<String>),
    Search,
}

fn parse_messages(raw: &str) -> Result<Vec<Message>> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::InvalidInput(format!("Invalid messages JSON: {}", e)))
}

/// `None` for an absent or empty id list.
fn non_empty(ids: Option<Vec<String>>) -> Option<Vec<String>> {
    ids.filter(|ids| !ids.is_empty())
}

fn to_sse(chunks: ChunkStream) -> EventStream {
    let events = chunks
        .map(|chunk| {
            let event = Event::default().json_data(&chunk).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to encode stream chunk");
                Event::default().data(r#"{"error":"failed to encode chunk"}"#)
            });
            Ok(event)
        })
        .boxed();
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Resolve sources, then start the answer stream.
///
/// The sources event is sent when `announce` is set or at least one passage
/// was found.
async fn stream_answer(
    state: &AppState,
    messages: Vec<Message>,
    grounding: Grounding,
    announce: bool,
) -> Result<EventStream> {
    // Reject malformed conversations before touching the embedder.
    state.generator.build_messages(&messages, "")?;

    let sources: Vec<RetrievalResult> = match grounding {
        Grounding::None => Vec::new(),
        Grounding::Ids(ids) => state.retriever.fetch_by_ids(&ids).await?,
        Grounding::Search => {
            let query = latest_user_query(&messages)
                .ok_or_else(|| AppError::InvalidInput("No user message found".to_string()))?;
            state.retriever.search(query).await?
        }
    };

    tracing::info!(
        messages = messages.len(),
        sources = sources.len(),
        model = state.generator.model_name(),
        "Streaming answer"
    );

    let announce = announce || !sources.is_empty();
    let chunks = state.generator.stream(&messages, sources, announce)?;
    Ok(to_sse(chunks))
}

/// Answer a conversation without retrieval
#[utoipa::path(
    get,
    path = "/generate",
    params(GenerateParams),
    responses(
        (status = 200, description = "Token stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed messages")
    ),
    tag = "generation"
)]
pub async fn generate_get(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<GenerateParams>,
) -> Result<EventStream> {
    let messages = parse_messages(&params.messages)?;
    stream_answer(&state, messages, Grounding::None, false).await
}

/// Answer a conversation grounded in explicit passages
///
/// With `source_ids`, exactly those passages are fetched (no embedding) and
/// sent as the first event.
#[utoipa::path(
    post,
    path = "/api/generate",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Sources then token stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed messages")
    ),
    tag = "generation"
)]
pub async fn generate_post(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<GenerateRequest>,
) -> Result<EventStream> {
    match non_empty(payload.source_ids) {
        Some(ids) => stream_answer(&state, payload.messages, Grounding::Ids(ids), true).await,
        None => stream_answer(&state, payload.messages, Grounding::None, false).await,
    }
}

/// Chat over the index
///
/// Uses `source_ids` when given, otherwise retrieves on the latest user message.
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Sources then token stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Malformed messages"),
        (status = 502, description = "Embedding backend failed")
    ),
    tag = "generation"
)]
pub async fn chat(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<GenerateRequest>,
) -> Result<EventStream> {
    let grounding = match non_empty(payload.source_ids) {
        Some(ids) => Grounding::Ids(ids),
        None => Grounding::Search,
    };
    stream_answer(&state, payload.messages, grounding, false).await
}

fn conversation_for(query: Option<String>, messages: Option<Vec<Message>>) -> Result<Vec<Message>> {
    match (query.filter(|q| !q.trim().is_empty()), messages) {
        (Some(query), _) => Ok(vec![Message::user(query)]),
        (None, Some(messages)) => Ok(messages),
        (None, None) => Err(AppError::InvalidInput(
            "Either query or messages is required".to_string(),
        )),
    }
}

/// Retrieve, then answer (query string form)
#[utoipa::path(
    get,
    path = "/retrieve-and-generate",
    params(RetrieveAndGenerateParams),
    responses(
        (status = 200, description = "Sources, tokens, done", content_type = "text/event-stream", body = String),
        (status = 400, description = "Neither query nor messages given"),
        (status = 502, description = "Embedding backend failed")
    ),
    tag = "generation"
)]
pub async fn retrieve_and_generate_get(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<RetrieveAndGenerateParams>,
) -> Result<EventStream> {
    let messages = params.messages.as_deref().map(parse_messages).transpose()?;
    let conversation = conversation_for(params.query, messages)?;
    stream_answer(&state, conversation, Grounding::Search, true).await
}

/// Retrieve, then answer (JSON body form)
#[utoipa::path(
    post,
    path = "/api/retrieve-and-generate",
    request_body = RetrieveAndGenerateRequest,
    responses(
        (status = 200, description = "Sources, tokens, done", content_type = "text/event-stream", body = String),
        (status = 400, description = "Neither query nor messages given"),
        (status = 502, description = "Embedding backend failed")
    ),
    tag = "generation"
)]
pub async fn retrieve_and_generate_post(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RetrieveAndGenerateRequest>,
) -> Result<EventStream> {
    let conversation = conversation_for(payload.query, payload.messages)?;
    stream_answer(&state, conversation, Grounding::Search, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    #[test]
    fn test_parse_messages() {
        let parsed = parse_messages(r#"[{"role":"user","content":"hi"}]"#).unwrap();
        assert_eq!(parsed, vec![Message::user("hi")]);
        assert!(matches!(
            parse_messages("not json"),
            Err(AppError::InvalidInput(_))
        ));
        assert!(parse_messages(r#"[{"role":"robot","content":"x"}]"#).is_err());
    }

    #[test]
    fn test_empty_source_ids_mean_none() {
        assert_eq!(non_empty(Some(vec![])), None);
        assert_eq!(non_empty(None), None);
        assert_eq!(
            non_empty(Some(vec!["a".to_string()])),
            Some(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_conversation_prefers_query() {
        let conv = conversation_for(
            Some("q".to_string()),
            Some(vec![Message::user("older")]),
        )
        .unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv[0].role, MessageRole::User);
        assert_eq!(conv[0].content, "q");

        let conv = conversation_for(Some("  ".to_string()), Some(vec![Message::user("m")])).unwrap();
        assert_eq!(conv[0].content, "m");

        assert!(conversation_for(None, None).is_err());
    }
}
