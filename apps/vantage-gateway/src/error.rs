use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("broker transport failure: {0}")]
    Transport(String),
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0} not found")]
    NotFound(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Decode(_) => StatusCode::BAD_GATEWAY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            GatewayError::Transport(_) => "transport",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::Decode(_) => "decode",
            GatewayError::NotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
