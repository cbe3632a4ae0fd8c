//! JSON error responses for API routes.

use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not Found")]
    NotFound,

    #[error("rate_limited")]
    RateLimited { retry_after_secs: u64 },
}

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::NotFound => (status, Json(json!({ "message": self.to_string() }))).into_response(),
            Self::RateLimited { retry_after_secs } => (
                status,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({ "error": "rate_limited", "retryAfterSec": retry_after_secs })),
            )
                .into_response(),
        }
    }
}
