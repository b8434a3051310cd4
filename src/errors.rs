use crate::services::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for handler errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code, and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION", msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.message,
            "error_code": self.code,
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::FileNotFound(_) | StoreError::TransferNotFound(_) => {
                AppError::not_found(err.to_string())
            }
            StoreError::Forbidden(_) => AppError::forbidden(err.to_string()),
            StoreError::Validation(_) => AppError::bad_request(err.to_string()),
            StoreError::ChunkMissing { .. } => {
                tracing::error!("chunk assembly failed: {err}");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ASSEMBLY_FAILED",
                    "chunk assembly failed; the upload must be retried",
                )
            }
            // I/O and serialization details stay in the logs; callers get a
            // generic failure without internal paths.
            StoreError::Io(inner) => {
                tracing::error!("storage I/O failure: {inner}");
                AppError::internal("storage I/O failure")
            }
            StoreError::Serde(inner) => {
                tracing::error!("snapshot serialization failure: {inner}");
                AppError::internal("persistence failure")
            }
        }
    }
}
