//! API error taxonomy.
//!
//! Every business-rule violation is a typed error value mapped to an HTTP
//! status; unexpected failures are logged and masked behind a generic 500.

use crate::persistence::DatabaseError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    /// No or invalid session
    #[error("{0}")]
    Unauthorized(String),

    /// Wrong role, inactive challenge, limit breached, not the trade owner
    #[error("{0}")]
    Forbidden(String),

    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    /// Challenge/trade/scrip/quote absent
    #[error("{0}")]
    NotFound(String),

    /// One-shot state transitions attempted twice (e.g. double square-off)
    #[error("{0}")]
    BadRequest(String),

    /// Unexpected failure; detail is logged, never returned
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "SERVER_ERROR",
        }
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        ApiError::Internal(detail.to_string())
    }
}

/// Wire shape for error responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            error!("Unhandled server error: {}", detail);
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            // Masked message for 500s; ApiError's Display already hides the detail
            message: self.to_string(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        ApiError::internal(e)
    }
}
