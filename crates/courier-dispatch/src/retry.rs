//! Retry scheduling after dispatch failures.
//!
//! A failed attempt bumps the job's retry counter through the store. While
//! the counter is below the limit the job goes back to pending and a timer
//! re-enqueues it after `base_delay * retry_count`. Once the counter reaches
//! the limit the job is failed with `Max retries reached: <detail>`.
//!
//! The timer owns the lease of the message that failed and acknowledges it
//! only after the retry message is on the queue. A process that dies while
//! timers are pending leaves those leases in flight, and startup recovery
//! puts them back.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, JobQueue, JobStore, Lease, QueueMessage, RequestId, UpdateOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    error::{DispatchError, ErrorCategory, Result},
    reconcile::Reconciler,
};

/// Retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts allowed before the job fails.
    pub max_retries: u32,
    /// Delay unit; the n-th retry waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_millis(1000) }
    }
}

impl RetryPolicy {
    /// Delay before re-enqueueing after the `retry_count`-th failure.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count)
    }
}

/// What the scheduler did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// A timer will re-enqueue the job; it owns the lease.
    Scheduled {
        /// Counter value after this failure.
        retry_count: u32,
        /// Delay before the message is re-enqueued.
        delay: Duration,
    },
    /// The retry budget is spent and the job has been failed.
    Exhausted {
        /// Counter value after this failure.
        retry_count: u32,
    },
    /// The job is gone or already terminal; nothing was changed.
    Abandoned,
}

/// Bumps retry counters and arms re-enqueue timers.
#[derive(Clone)]
pub struct RetryScheduler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    reconciler: Reconciler,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RetryScheduler {
    /// Creates a scheduler.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        reconciler: Reconciler,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, queue, reconciler, policy, clock }
    }

    /// Active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Handles a dispatch failure for the leased message.
    ///
    /// On `Scheduled` the lease has been handed to the timer and the caller
    /// must not acknowledge it. For every other decision the caller
    /// acknowledges the lease.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the store fails. The retry counter is
    /// unchanged in that case.
    pub async fn handle_failure(&self, lease: &Lease, failure: &DispatchError) -> Result<RetryDecision> {
        let request_id = &lease.message.request_id;
        let outcome =
            self.store.record_retry(request_id, self.policy.max_retries, self.clock.now_utc()).await?;

        let job = match outcome {
            UpdateOutcome::Applied(job) => job,
            UpdateOutcome::AlreadyFinalized(job) => {
                debug!(request_id = %request_id, status = %job.status, "failed attempt for terminal job");
                return Ok(RetryDecision::Abandoned);
            },
            UpdateOutcome::NotFound => {
                warn!(request_id = %request_id, "failed attempt for unknown job");
                return Ok(RetryDecision::Abandoned);
            },
        };

        if job.has_retries_left(self.policy.max_retries) {
            let delay = self.policy.delay_for(job.retry_count);
            info!(
                request_id = %request_id,
                retry_count = job.retry_count,
                delay_ms = delay.as_millis(),
                error = %failure,
                category = %ErrorCategory::from(failure),
                "dispatch failed, retry scheduled"
            );
            self.arm_timer(lease.clone(), job.payload, job.retry_count, delay);
            return Ok(RetryDecision::Scheduled { retry_count: job.retry_count, delay });
        }

        let exhausted = DispatchError::retries_exhausted(job.retry_count, failure.to_string());
        warn!(
            request_id = %request_id,
            retry_count = job.retry_count,
            error = %failure,
            "dispatch failed, retries exhausted"
        );
        match self.reconciler.fail(request_id, exhausted.to_string()).await {
            Ok(_) | Err(DispatchError::JobNotFound { .. }) => {},
            Err(other) => return Err(other),
        }
        Ok(RetryDecision::Exhausted { retry_count: job.retry_count })
    }

    fn arm_timer(&self, lease: Lease, payload: serde_json::Value, retry_count: u32, delay: Duration) {
        let queue = self.queue.clone();
        let clock = self.clock.clone();
        let request_id: RequestId = lease.message.request_id.clone();

        tokio::spawn(async move {
            clock.sleep(delay).await;

            let message = QueueMessage::retry(request_id.clone(), payload, retry_count);
            if let Err(e) = queue.push(message).await {
                error!(
                    request_id = %request_id,
                    error = %e,
                    "failed to re-enqueue job, lease left for recovery"
                );
                return;
            }
            if let Err(e) = queue.ack(lease).await {
                warn!(request_id = %request_id, error = %e, "failed to acknowledge retried message");
            }
            debug!(request_id = %request_id, retry_count, "job re-enqueued");
        });
    }
}
