//! API request handlers.
//!
//! This module contains all HTTP request handlers organized by functionality.

/// Original document and data-directory file serving.
pub mod documents;
/// Streaming generation handlers.
pub mod generate;
/// Health check handler.
pub mod health;
/// Passage retrieval handlers.
pub mod retrieve;
