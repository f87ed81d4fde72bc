//! Job status lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{Job, JobStatus, RequestId};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, instrument};

use super::error_response;
use crate::AppState;

/// Public view of a job.
///
/// Carries the result only when complete and the error only when failed.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    /// Job identifier
    pub request_id: RequestId,
    /// Lifecycle state
    pub status: JobStatus,
    /// Vendor of the latest attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Dispatch failures so far
    pub retry_count: u32,
    /// Sanitized vendor result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let (result, error) = match job.status {
            JobStatus::Complete => (job.result, None),
            JobStatus::Failed => (None, job.error_message),
            JobStatus::Pending | JobStatus::Processing => (None, None),
        };
        Self {
            request_id: job.request_id,
            status: job.status,
            vendor: job.vendor,
            retry_count: job.retry_count,
            result,
            error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Returns the current state of a job.
#[instrument(name = "get_job", skip(state))]
pub async fn get_job(Path(request_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.store.find(&RequestId::from(request_id.as_str())).await {
        Ok(Some(job)) => (StatusCode::OK, Json(JobResponse::from(job))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Job not found", Some(&request_id)),
        Err(e) => {
            error!(error = %e, "Failed to load job");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(&request_id),
            )
        },
    }
}
