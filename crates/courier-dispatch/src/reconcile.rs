//! Terminal state reconciliation.
//!
//! The worker (for synchronous replies and exhausted retries) and the webhook
//! endpoint (for asynchronous callbacks) both finish jobs through
//! [`Reconciler`]. The store's conditional write guarantees the first
//! terminal write wins and every later one is reported as already finalized.

use std::sync::Arc;

use courier_core::{Clock, Job, JobStore, Outcome, RequestId, Resolution, Sanitizer, UpdateOutcome};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};

/// Message stored when a vendor reports failure without saying why.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Vendor processing failed";

/// Result of a reconciliation that found the job.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// This call moved the job to a terminal state.
    Applied(Job),
    /// The job was already terminal and was left as it was.
    AlreadyFinalized(Job),
}

impl Reconciliation {
    /// The job as stored after the call.
    pub fn job(&self) -> &Job {
        match self {
            Self::Applied(job) | Self::AlreadyFinalized(job) => job,
        }
    }

    /// Returns true if the job was already terminal.
    pub fn already_finalized(&self) -> bool {
        matches!(self, Self::AlreadyFinalized(_))
    }
}

/// Applies vendor outcomes to jobs.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    sanitizer: Sanitizer,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    /// Creates a reconciler writing through `store`.
    pub fn new(store: Arc<dyn JobStore>, sanitizer: Sanitizer, clock: Arc<dyn Clock>) -> Self {
        Self { store, sanitizer, clock }
    }

    /// Sanitizer applied to successful results.
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// Records a vendor outcome as the job's terminal state.
    ///
    /// Successful data is sanitized before it is stored. A failure without a
    /// message is stored as [`DEFAULT_FAILURE_MESSAGE`].
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for an unknown request ID and
    /// `InfrastructureError` if the store fails.
    pub async fn reconcile(&self, request_id: &RequestId, outcome: Outcome) -> Result<Reconciliation> {
        let resolution = match outcome {
            Outcome::Success(data) => Resolution::Complete { result: self.sanitizer.sanitize(&data) },
            Outcome::Failure { message } => Resolution::Failed {
                error_message: message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
            },
        };
        self.apply(request_id, resolution).await
    }

    /// Fails a job with an explicit message.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::reconcile`].
    pub async fn fail(&self, request_id: &RequestId, message: impl Into<String>) -> Result<Reconciliation> {
        self.apply(request_id, Resolution::Failed { error_message: message.into() }).await
    }

    async fn apply(&self, request_id: &RequestId, resolution: Resolution) -> Result<Reconciliation> {
        let status = resolution.status();
        match self.store.finalize(request_id, resolution, self.clock.now_utc()).await? {
            UpdateOutcome::Applied(job) => {
                info!(request_id = %request_id, status = %status, vendor = ?job.vendor, "job finalized");
                Ok(Reconciliation::Applied(job))
            },
            UpdateOutcome::AlreadyFinalized(job) => {
                debug!(
                    request_id = %request_id,
                    status = %job.status,
                    "job already finalized, outcome ignored"
                );
                Ok(Reconciliation::AlreadyFinalized(job))
            },
            UpdateOutcome::NotFound => {
                warn!(request_id = %request_id, "outcome for unknown job");
                Err(DispatchError::not_found(request_id))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{JobStatus, MemoryJobStore, TestClock};
    use serde_json::json;

    use super::*;

    async fn setup() -> (MemoryJobStore, Reconciler, RequestId) {
        let store = MemoryJobStore::new();
        let clock = TestClock::new();
        let request_id = RequestId::from("req-1");
        store.create(Job::new(request_id.clone(), json!({}), clock.now_utc())).await.unwrap();
        store.begin_attempt(&request_id, "sync", clock.now_utc()).await.unwrap();
        let reconciler =
            Reconciler::new(Arc::new(store.clone()), Sanitizer::default(), Arc::new(clock));
        (store, reconciler, request_id)
    }

    #[tokio::test]
    async fn success_is_sanitized_before_storage() {
        let (store, reconciler, request_id) = setup().await;

        let outcome = Outcome::Success(json!({"ssn": "123-45-6789", "name": "  Ada "}));
        let reconciliation = reconciler.reconcile(&request_id, outcome).await.unwrap();

        assert!(!reconciliation.already_finalized());
        let job = store.find(&request_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.result, Some(json!({"name": "Ada"})));
    }

    #[tokio::test]
    async fn failure_without_message_uses_default() {
        let (store, reconciler, request_id) = setup().await;

        reconciler.reconcile(&request_id, Outcome::Failure { message: None }).await.unwrap();

        let job = store.find(&request_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn second_outcome_is_ignored() {
        let (store, reconciler, request_id) = setup().await;

        reconciler.fail(&request_id, "first").await.unwrap();
        let second =
            reconciler.reconcile(&request_id, Outcome::Success(json!({"late": true}))).await.unwrap();

        assert!(second.already_finalized());
        let job = store.find(&request_id).await.unwrap().unwrap();
        assert_eq!(job.error_message.as_deref(), Some("first"));
        assert_eq!(second.job(), &job);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (_store, reconciler, _) = setup().await;

        let error = reconciler
            .reconcile(&RequestId::from("missing"), Outcome::Success(json!({})))
            .await
            .unwrap_err();

        assert!(matches!(error, DispatchError::JobNotFound { .. }));
    }
}
