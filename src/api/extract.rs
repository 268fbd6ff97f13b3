//! Extractors whose rejections render as `{"error": ..}` bodies.

use crate::types::AppError;
use axum::extract::{FromRequest, FromRequestParts};

/// `axum::Json` with rejections mapped to [`AppError::InvalidInput`].
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `axum::extract::Query` with rejections mapped to [`AppError::InvalidInput`].
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);
