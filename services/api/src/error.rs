//! API error taxonomy and HTTP mapping.
//!
//! Validation failures reject the request before any object is
//! created; a missing blob or record maps to the generic not-found
//! body; storage failures propagate as server errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use shutter_storage::StorageError;
use thiserror::Error;
use tracing::error;

/// Errors returned by API handlers
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad MIME type or missing required fields
    #[error("{0}")]
    Validation(String),

    /// Missing blob or record
    #[error("requested resource does not exist")]
    NotFound,

    /// Blob or metadata store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound
        } else {
            ApiError::Storage(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Requested resource does not exist".to_string(),
            ),
            ApiError::Storage(msg) => {
                error!(error = %msg, "Storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "Server error. Please try again later.".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Server error. Please try again later.".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}
