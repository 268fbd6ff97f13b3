use crate::api::handlers::{documents, generate, health, retrieve};
use crate::types::{
    BoundingBox, DocType, GenerateRequest, Highlight, HighlightRect, Message, MessageRole,
    RetrievalResult, RetrieveAndGenerateRequest, RetrieveRequest, SourceKind,
};
use crate::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, Request},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use uuid::Uuid;

/// OpenAPI document for every public endpoint.
#[derive(OpenApi)]
#[openapi(
    info(title = "lexio", description = "Retrieval-augmented generation over SSE"),
    paths(
        retrieve::retrieve_get,
        retrieve::retrieve_post,
        generate::generate_get,
        generate::generate_post,
        generate::chat,
        generate::retrieve_and_generate_get,
        generate::retrieve_and_generate_post,
        documents::get_document,
        documents::get_source,
        health::health,
    ),
    components(schemas(
        Message,
        MessageRole,
        RetrieveRequest,
        GenerateRequest,
        RetrieveAndGenerateRequest,
        RetrievalResult,
        SourceKind,
        Highlight,
        HighlightRect,
        BoundingBox,
        DocType,
        health::HealthResponse,
    )),
    tags(
        (name = "retrieval", description = "Semantic passage search"),
        (name = "generation", description = "Streamed answers (Server-Sent Events)"),
        (name = "documents", description = "Original files"),
        (name = "operations", description = "Health and metadata"),
    )
)]
pub struct ApiDoc;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

/// Build the application router with all middleware applied.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors = cors_layer(&server.cors_origins);
    let body_limit = DefaultBodyLimit::max(server.max_body_bytes);

    let api = Router::new()
        .route(
            "/retrieve",
            get(retrieve::retrieve_get).post(retrieve::retrieve_post),
        )
        .route(
            "/generate",
            get(generate::generate_get).post(generate::generate_post),
        )
        .route("/api/generate", post(generate::generate_post))
        .route("/api/chat", post(generate::chat))
        .route(
            "/retrieve-and-generate",
            get(generate::retrieve_and_generate_get),
        )
        .route(
            "/api/retrieve-and-generate",
            post(generate::retrieve_and_generate_post),
        )
        .route("/pdfs/{id}", get(documents::get_document))
        .route("/sources/{filename}", get(documents::get_source))
        .route("/health", get(health::health));

    #[cfg(feature = "swagger-ui")]
    let api = api.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    #[cfg(not(feature = "swagger-ui"))]
    let api = api.route(
        "/api-docs/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
    );

    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
        .layer(cors)
        .layer(body_limit);

    api.layer(middleware).with_state(state)
}
