//! Unified API error type with consistent JSON responses.
//!
//! Handlers return `Result<impl IntoResponse, ApiError>`; every variant
//! maps to a status code and a `{"error": ...}` body. Validation errors
//! additionally carry a `details` array of `{field, message}` entries.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Unified error type for HTTP API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// Schema validation failed; `details` lists every offending field.
    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// New work is refused while the budget guard has paused spending.
    #[error("budget paused")]
    BudgetPaused,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "validation failed", "details": details})),
            )
                .into_response(),
            ApiError::NotFound(msg) => error_body(StatusCode::NOT_FOUND, &msg),
            ApiError::BadRequest(msg) => error_body(StatusCode::BAD_REQUEST, &msg),
            ApiError::Unauthorized(msg) => error_body(StatusCode::UNAUTHORIZED, &msg),
            ApiError::BudgetPaused => error_body(StatusCode::CONFLICT, "budget paused"),
            ApiError::Conflict(msg) => error_body(StatusCode::CONFLICT, &msg),
            ApiError::Internal(msg) => error_body(StatusCode::INTERNAL_SERVER_ERROR, &msg),
            ApiError::ServiceUnavailable(msg) => error_body(StatusCode::SERVICE_UNAVAILABLE, &msg),
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn error_response(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body_bytes = to_bytes(response.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn not_found_returns_404() {
        let (status, body) = error_response(ApiError::NotFound("task not found".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "task not found");
    }

    #[tokio::test]
    async fn validation_carries_details() {
        let (status, body) = error_response(ApiError::Validation(vec![
            FieldError::new("tasks[0].prompt", "must be 1-50000 characters"),
            FieldError::new("tasks[1].context.branch", "invalid characters"),
        ]))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation failed");
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
        assert_eq!(body["details"][0]["field"], "tasks[0].prompt");
    }

    #[tokio::test]
    async fn budget_paused_is_a_409_with_fixed_message() {
        let (status, body) = error_response(ApiError::BudgetPaused).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "budget paused");
    }

    #[tokio::test]
    async fn internal_returns_500() {
        let (status, _) = error_response(ApiError::Internal("boom".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
