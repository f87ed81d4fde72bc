//! Job store abstraction.
//!
//! Every write to a job is a single conditional update keyed by
//! `request_id`. Terminal jobs are never modified, which is what makes the
//! worker loop, the retry timers and the webhook endpoint safe to run
//! concurrently against the same record.

use std::{future::Future, pin::Pin};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{Job, RequestId, Resolution},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

/// Result of a conditional update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The update was applied; carries the job as stored afterwards.
    Applied(Job),

    /// The job was already terminal; carries it unchanged.
    AlreadyFinalized(Job),

    /// No job exists for the request ID.
    NotFound,
}

impl UpdateOutcome {
    /// Returns the job for the applied and already-finalized cases.
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Applied(job) | Self::AlreadyFinalized(job) => Some(job),
            Self::NotFound => None,
        }
    }
}

/// Storage operations required by the dispatch engine and the API.
pub trait JobStore: Send + Sync + 'static {
    /// Inserts a new job.
    ///
    /// Fails with `ConstraintViolation` if the request ID is taken.
    fn create(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a job by request ID.
    fn find(
        &self,
        request_id: &RequestId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>>;

    /// Marks a non-terminal job as processing for a new attempt.
    ///
    /// Stamps `started_processing_at` and `updated_at` and records `vendor`.
    fn begin_attempt(
        &self,
        request_id: &RequestId,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>>;

    /// Applies a terminal resolution if the job is pending or processing.
    ///
    /// Stamps `completed_at` or `failed_at`, `vendor_response_received_at`
    /// and `updated_at`.
    fn finalize(
        &self,
        request_id: &RequestId,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>>;

    /// Counts one dispatch failure, capped at `max_retries`.
    ///
    /// Returns the job to pending while the count stays below the bound.
    fn record_retry(
        &self,
        request_id: &RequestId,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>>;

    /// Deletes terminal jobs last updated before `cutoff`.
    fn purge_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;

    /// Verifies the store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
