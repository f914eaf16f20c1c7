//! Evaluation-layer errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors raised while serving `/evaluate`.
///
/// Only request-level failures reach the caller as non-2xx responses.
/// Model and evaluator failures are recovered per task by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("task store error: {0}")]
    TaskStore(String),

    #[error("unknown task id {0}")]
    UnknownTask(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("evaluator error: {0}")]
    Evaluator(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EnvError {
    pub fn status(&self) -> StatusCode {
        match self {
            EnvError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EnvError::UnknownTask(_) => StatusCode::NOT_FOUND,
            EnvError::Model(_) | EnvError::Evaluator(_) => StatusCode::BAD_GATEWAY,
            EnvError::TaskStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EnvError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "evaluate request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Result type for environment operations.
pub type EnvResult<T> = std::result::Result<T, EnvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            EnvError::InvalidRequest("max_steps".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(EnvError::UnknownTask("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            EnvError::TaskStore("missing".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
