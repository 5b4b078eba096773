use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::services::gateway::GatewayError;
use crate::store::StoreError;

/// Error surface of the HTTP API. Every handler returns this; the
/// `IntoResponse` impl is the single place status codes are chosen.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid webhook signature")]
    SignatureRejected,

    #[error("{0}")]
    NotFound(String),

    #[error("payment gateway error: {0}")]
    Upstream(#[from] GatewayError),

    #[error("{0}")]
    Misconfigured(String),

    #[error("storage error")]
    Storage(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::SignatureRejected => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Misconfigured(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Detail for 5xx goes to the log, not the response body.
        match &self {
            ApiError::Storage(source) => error!("storage error: {source}"),
            ApiError::Misconfigured(reason) => error!("misconfiguration: {reason}"),
            ApiError::Upstream(source) => error!("gateway error: {source}"),
            _ => {}
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
