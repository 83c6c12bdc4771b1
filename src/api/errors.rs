use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Request-level error taxonomy. Validation failures short-circuit before any
/// persistence call; persistence failures are logged in full and surfaced as a
/// generic 500 (the detail is included in the body only in debug builds);
/// a failed liveness check on `PUT /api/settings/db` is an expected,
/// recoverable path that leaves the previous pool authoritative.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database connection test failed: {0}")]
    Liveness(#[source] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::NotFound(reason) => (StatusCode::NOT_FOUND, reason.clone()),
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Persistence failure");
                (StatusCode::INTERNAL_SERVER_ERROR, generic_message(e))
            }
            ApiError::Liveness(e) => {
                tracing::error!(error = %e, "Liveness check failed, keeping previous connection");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database connection test failed".to_owned(),
                )
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn generic_message(e: &sqlx::Error) -> String {
    if cfg!(debug_assertions) {
        format!("Internal server error: {e}")
    } else {
        "Internal server error".to_owned()
    }
}
