//! HTTP request handlers.
//!
//! Handlers are grouped by functionality:
//! - `webhook` - asynchronous vendor callbacks
//! - `jobs` - job status lookup
//! - `health` - health and liveness probes
//!
//! Error bodies share one shape, `{"error": ..., "request_id": ...}`, so
//! vendors and operators can correlate failures with job records.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub mod health;
pub mod jobs;
pub mod webhook;

pub use health::{health_check, liveness_check};
pub use jobs::get_job;
pub use webhook::vendor_webhook;

/// Error body returned by every handler.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error description
    pub error: String,
    /// Job the request referred to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

pub(crate) fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    request_id: Option<&str>,
) -> Response {
    let body = ErrorResponse { error: error.into(), request_id: request_id.map(str::to_string) };
    (status, Json(body)).into_response()
}
