//! Request/response bodies and the error type of the HTTP API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codebox_core::api::{ErrorDetail, JobId, Lifecycle};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainBody {
    pub source: String,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
    pub lifecycle: Lifecycle,
    pub session_id: String,
    pub uptime_seconds: f64,
    pub requests_handled: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    error_code: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl HttpServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            HttpServerError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            HttpServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            HttpServerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        }
    }
}

impl IntoResponse for HttpServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            error_code: code,
        };
        (status, Json(body)).into_response()
    }
}
