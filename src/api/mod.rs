//! HTTP API Handlers and Routes
//!
//! This module provides the REST/SSE layer for lexio, built on the Axum web framework.
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//!
//! # API Endpoints
//!
//! ## Retrieval
//! - `GET /retrieve?query=` / `POST /retrieve` - Top-K passages for a query
//!
//! ## Generation (Server-Sent Events)
//! - `GET /generate?messages=` - Answer a conversation without retrieval
//! - `POST /generate`, `POST /api/generate` - Answer using explicit `source_ids`
//! - `GET /retrieve-and-generate`, `POST /api/retrieve-and-generate` - Retrieve, then answer
//! - `POST /api/chat` - Explicit sources when given, otherwise retrieval on the latest user turn
//!
//! Every event is `data: <json>` carrying `{sources}`, `{content, done}` or
//! `{error}`. Each stream ends with exactly one `{"content": "", "done": true}`.
//!
//! ## Documents
//! - `GET /pdfs/{id}` - Original document behind a passage
//! - `GET /sources/{filename}` - File from the data directory
//!
//! ## Operations
//! - `GET /health` - Liveness and index size
//! - `GET /api-docs/openapi.json` - OpenAPI document
//!
//! # OpenAPI Documentation
//!
//! When the `swagger-ui` feature is enabled, interactive API documentation
//! is available at `/swagger-ui/`.

/// Extractors with JSON error bodies.
pub mod extract;
/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
