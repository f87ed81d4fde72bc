//! Test infrastructure for deterministic testing.
//!
//! Provides an in-memory environment (store, queue and a controllable clock),
//! job fixture builders and wiremock-backed mock vendors.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

pub use courier_core::TestClock;
use courier_core::{
    Clock, Job, JobQueue, JobStatus, JobStore, MemoryJobQueue, MemoryJobStore, QueueMessage,
    RequestId,
};
use serde_json::Value;

pub mod fixtures;
pub mod vendor;

pub use fixtures::{webhook_body, JobBuilder};
pub use vendor::MockVendor;

/// In-memory environment shared by the code under test and the test body.
///
/// Every field is a cheap clone over shared state, so handles given to an
/// engine or router observe the same jobs, messages and time as the test.
#[derive(Debug, Clone, Default)]
pub struct TestEnv {
    /// Job store
    pub store: MemoryJobStore,
    /// Job queue
    pub queue: MemoryJobQueue,
    /// Deterministic clock
    pub clock: TestClock,
}

impl TestEnv {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store as a trait object.
    pub fn store_handle(&self) -> Arc<dyn JobStore> {
        Arc::new(self.store.clone())
    }

    /// Queue as a trait object.
    pub fn queue_handle(&self) -> Arc<dyn JobQueue> {
        Arc::new(self.queue.clone())
    }

    /// Clock as a trait object.
    pub fn clock_handle(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }

    /// Inserts a job without queueing it.
    pub async fn insert_job(&self, job: Job) {
        self.store.create(job).await.expect("job should be inserted");
    }

    /// Creates a pending job and queues its first message.
    pub async fn enqueue_job(&self, payload: Value) -> RequestId {
        let request_id = RequestId::new();
        self.insert_job(Job::new(request_id.clone(), payload.clone(), self.clock.now_utc())).await;
        self.queue
            .push(QueueMessage::initial(request_id.clone(), payload))
            .await
            .expect("message should be queued");
        request_id
    }

    /// Fetches a job that must exist.
    pub async fn job(&self, request_id: &RequestId) -> Job {
        self.store
            .find(request_id)
            .await
            .expect("store should be readable")
            .unwrap_or_else(|| panic!("job {request_id} should exist"))
    }

    /// Polls until the job reaches `status` or `timeout` of real time passes.
    ///
    /// # Panics
    ///
    /// Panics with the last observed job if the status is not reached.
    pub async fn wait_for_status(
        &self,
        request_id: &RequestId,
        status: JobStatus,
        timeout: Duration,
    ) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(request_id).await;
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {request_id} did not reach {status} within {timeout:?}: {job:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
