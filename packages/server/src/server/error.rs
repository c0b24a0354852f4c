//! Error responses for the gateway API.
//!
//! Caller mistakes come back as 400 with a single message; engine
//! invariant violations as 500. Upstream failures never appear here —
//! they ride along as warnings on a 200 response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use elc_composite::CompositeError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CompositeError> for ApiError {
    fn from(e: CompositeError) -> Self {
        match e {
            CompositeError::BadRequest(msg) => ApiError::BadRequest(msg),
            CompositeError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
