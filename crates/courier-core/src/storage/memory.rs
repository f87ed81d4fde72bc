//! In-memory job store.
//!
//! Each transition runs under a single write lock, giving the same
//! atomicity as the conditional SQL updates in the PostgreSQL store.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{JobStore, UpdateOutcome};
use crate::{
    error::{CoreError, Result},
    models::{Job, RequestId, Resolution},
};

/// Job store backed by a shared hash map.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<RequestId, Job>>>,
    injected_error: Arc<RwLock<Option<String>>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next store operation fail with a database error.
    pub async fn inject_error(&self, message: impl Into<String>) {
        *self.injected_error.write().await = Some(message.into());
    }

    /// Returns every stored job.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Returns the number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Returns true if no jobs are stored.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    async fn take_injected_error(&self) -> Result<()> {
        match self.injected_error.write().await.take() {
            Some(message) => Err(CoreError::Database(message)),
            None => Ok(()),
        }
    }

    async fn transition<F>(&self, request_id: &RequestId, apply: F) -> Result<UpdateOutcome>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        self.take_injected_error().await?;

        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(request_id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if apply(job) {
            Ok(UpdateOutcome::Applied(job.clone()))
        } else {
            Ok(UpdateOutcome::AlreadyFinalized(job.clone()))
        }
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.take_injected_error().await?;

            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job.request_id) {
                return Err(CoreError::ConstraintViolation(format!(
                    "job {} already exists",
                    job.request_id
                )));
            }
            jobs.insert(job.request_id.clone(), job);
            Ok(())
        })
    }

    fn find(
        &self,
        request_id: &RequestId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>> {
        let request_id = request_id.clone();
        Box::pin(async move {
            self.take_injected_error().await?;
            Ok(self.jobs.read().await.get(&request_id).cloned())
        })
    }

    fn begin_attempt(
        &self,
        request_id: &RequestId,
        vendor: &str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>> {
        let request_id = request_id.clone();
        let vendor = vendor.to_string();
        Box::pin(async move {
            self.transition(&request_id, |job| job.begin_attempt(&vendor, now)).await
        })
    }

    fn finalize(
        &self,
        request_id: &RequestId,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>> {
        let request_id = request_id.clone();
        Box::pin(async move {
            self.transition(&request_id, |job| job.resolve(&resolution, now)).await
        })
    }

    fn record_retry(
        &self,
        request_id: &RequestId,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<UpdateOutcome>> + Send + '_>> {
        let request_id = request_id.clone();
        Box::pin(async move {
            self.transition(&request_id, |job| job.record_retry(max_retries, now)).await
        })
    }

    fn purge_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            self.take_injected_error().await?;

            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, job| !(job.is_terminal() && job.updated_at < cutoff));
            Ok((before - jobs.len()) as u64)
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.take_injected_error().await })
    }
}
