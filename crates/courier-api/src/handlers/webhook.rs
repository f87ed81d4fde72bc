//! Vendor webhook handler.
//!
//! Asynchronous vendors report the outcome of an accepted job by posting to
//! `/vendor-webhook/{vendor}`. The outcome goes through the same
//! [`Reconciler`](courier_dispatch::Reconciler) the worker uses, so a
//! webhook racing a retry timer or a duplicate delivery can never overwrite
//! a terminal job.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courier_core::{JobStatus, Outcome, RequestId};
use courier_dispatch::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::error_response;
use crate::AppState;

/// Failure message stored when the webhook carries no `data.error`.
pub const WEBHOOK_FAILURE_MESSAGE: &str = "Vendor failed";

/// Body posted by a vendor.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRequest {
    /// Job the vendor is reporting on
    pub request_id: RequestId,
    /// `success` or `error`
    pub status: String,
    /// Result data, or `{"error": "..."}` on failure
    #[serde(default)]
    pub data: Option<Value>,
}

impl WebhookRequest {
    /// Interprets the body as a vendor outcome.
    ///
    /// Only `success` with truthy data counts as success. Everything else
    /// is a failure carrying `data.error` when it is a string.
    pub fn outcome(&self) -> Outcome {
        let message = self
            .data
            .as_ref()
            .and_then(|data| data.get("error"))
            .and_then(Value::as_str)
            .unwrap_or(WEBHOOK_FAILURE_MESSAGE);
        Outcome::from_reported(&self.status, self.data.clone(), Some(message.to_string()))
    }
}

/// Reply sent back to the vendor.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always true; failures use the error body
    pub success: bool,
    /// Job the webhook referred to
    pub request_id: RequestId,
    /// Status stored after the call
    pub status: JobStatus,
    /// Set when the job was already terminal and nothing changed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_finalized: bool,
}

/// Applies a vendor-reported outcome to its job.
///
/// Returns 404 for an unknown request ID without touching the store. A
/// late or duplicate webhook for a terminal job is a successful no-op that
/// reports the stored status.
#[instrument(
    name = "vendor_webhook",
    skip(state, request),
    fields(request_id = %request.request_id, status = %request.status)
)]
pub async fn vendor_webhook(
    Path(vendor): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> Response {
    info!(vendor = %vendor, "Vendor webhook received");

    let outcome = request.outcome();
    match state.reconciler.reconcile(&request.request_id, outcome).await {
        Ok(reconciliation) => {
            let job = reconciliation.job();
            if reconciliation.already_finalized() {
                debug!(stored = %job.status, "Webhook for terminal job ignored");
            }
            let body = WebhookResponse {
                success: true,
                request_id: job.request_id.clone(),
                status: job.status,
                already_finalized: reconciliation.already_finalized(),
            };
            (StatusCode::OK, Json(body)).into_response()
        },
        Err(DispatchError::JobNotFound { .. }) => {
            warn!("Webhook for unknown job");
            error_response(StatusCode::NOT_FOUND, "Job not found", Some(request.request_id.as_str()))
        },
        Err(e) => {
            error!(error = %e, "Failed to apply webhook outcome");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(request.request_id.as_str()),
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(body: Value) -> WebhookRequest {
        serde_json::from_value(body).expect("valid webhook body")
    }

    #[test]
    fn success_with_data_is_success() {
        let webhook = request(json!({"request_id": "r", "status": "success", "data": {"a": 1}}));
        assert_eq!(webhook.outcome(), Outcome::Success(json!({"a": 1})));
    }

    #[test]
    fn success_without_data_is_failure() {
        for body in [
            json!({"request_id": "r", "status": "success"}),
            json!({"request_id": "r", "status": "success", "data": null}),
            json!({"request_id": "r", "status": "success", "data": false}),
            json!({"request_id": "r", "status": "success", "data": 0}),
            json!({"request_id": "r", "status": "success", "data": ""}),
        ] {
            assert_eq!(
                request(body).outcome(),
                Outcome::Failure { message: Some(WEBHOOK_FAILURE_MESSAGE.to_string()) }
            );
        }
    }

    #[test]
    fn success_with_empty_container_is_success() {
        let webhook = request(json!({"request_id": "r", "status": "success", "data": []}));
        assert_eq!(webhook.outcome(), Outcome::Success(json!([])));
    }

    #[test]
    fn error_uses_vendor_message_when_string() {
        let webhook = request(json!({"request_id": "r", "status": "error", "data": {"error": "boom"}}));
        assert_eq!(webhook.outcome(), Outcome::Failure { message: Some("boom".to_string()) });

        let webhook = request(json!({"request_id": "r", "status": "error", "data": {"error": 42}}));
        assert_eq!(
            webhook.outcome(),
            Outcome::Failure { message: Some(WEBHOOK_FAILURE_MESSAGE.to_string()) }
        );
    }

    #[test]
    fn unknown_status_is_failure() {
        let webhook = request(json!({"request_id": "r", "status": "weird", "data": {"x": 1}}));
        assert!(matches!(webhook.outcome(), Outcome::Failure { .. }));
    }
}
