//! PostgreSQL job store.
//!
//! Each transition is one `UPDATE ... WHERE status IN ('pending',
//! 'processing') RETURNING ...` statement, so terminal rows are never
//! touched. When the update matches nothing, a follow-up read tells an
//! absent job apart from a finalized one; terminal rows cannot change back,
//! so the read is consistent with the refused update.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};

use super::{JobStore, UpdateOutcome};
use crate::{
    error::Result,
    models::{Job, JobStatus, RequestId, Resolution},
};

const JOB_COLUMNS: &str = "request_id, payload, status, vendor, result, error_message, \
                           retry_count, created_at, updated_at, started_processing_at, \
                           completed_at, failed_at, vendor_response_received_at";

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        request_id TEXT PRIMARY KEY,
        payload JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'complete', 'failed')),
        vendor TEXT,
        result JSONB,
        error_message TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_processing_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        failed_at TIMESTAMPTZ,
        vendor_response_received_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_status_updated
    ON jobs(status, updated_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_vendor
    ON jobs(vendor)
    WHERE vendor IS NOT NULL
    "#,
];

/// Job store backed by a PostgreSQL `jobs` table.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Creates the `jobs` table and its indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }

    async fn find_impl<'e, E>(&self, executor: E, request_id: &RequestId) -> Result<Option<Job>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let job = sqlx::query_as::<_, Job>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE request_id = $1"
        ))
        .bind(request_id)
        .fetch_optional(executor)
        .await?;

        Ok(job)
    }

    /// Turns the row returned by a conditional update into an outcome.
    async fn settle(&self, request_id: &RequestId, updated: Option<Job>) -> Result<UpdateOutcome> {
        if let Some(job) = updated {
            return Ok(UpdateOutcome::Applied(job));
        }

        match self.find_impl(&*self.pool, request_id).await? {
            Some(job) => Ok(UpdateOutcome::AlreadyFinalized(job)),
            None => Ok(UpdateOutcome::NotFound),
        }
    }
}

impl JobStore for PostgresJobStore {
    fn create(&self, job: Job) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO jobs (
                    request_id, payload, status, vendor, retry_count, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&job.request_id)
            .bind(&job.payload)
            .bind(job.status.to_string())
            .bind(&job.vendor)
            .bind(i32::try_from(job.retry_count).unwrap_or(i32::MAX))
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&*self.pool)
            .await?;

            Ok(())
        })
    }

    fn find(
        &self,
        request_id: &RequestId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Job>>> + Send + '_>> {
        let request_id = request_id.clone();
        Box::pin(async move { self.find_impl(&*self.pool, &request_id).await })
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
            let updated = sqlx::query_as::<_, Job>(&format!(
                r#"
                UPDATE jobs
                SET status = 'processing',
                    vendor = $2,
                    started_processing_at = $3,
                    updated_at = $3
                WHERE request_id = $1
                  AND status IN ('pending', 'processing')
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(&request_id)
            .bind(&vendor)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await?;

            self.settle(&request_id, updated).await
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
            let status = resolution.status();
            let (result, error_message) = match resolution {
                Resolution::Complete { result } => (Some(result), None),
                Resolution::Failed { error_message } => (None, Some(error_message)),
            };
            let completed_at = (status == JobStatus::Complete).then_some(now);
            let failed_at = (status == JobStatus::Failed).then_some(now);

            let updated = sqlx::query_as::<_, Job>(&format!(
                r#"
                UPDATE jobs
                SET status = $2,
                    result = $3,
                    error_message = $4,
                    completed_at = $5,
                    failed_at = $6,
                    vendor_response_received_at = $7,
                    updated_at = $7
                WHERE request_id = $1
                  AND status IN ('pending', 'processing')
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(&request_id)
            .bind(status.to_string())
            .bind(result)
            .bind(error_message)
            .bind(completed_at)
            .bind(failed_at)
            .bind(now)
            .fetch_optional(&*self.pool)
            .await?;

            self.settle(&request_id, updated).await
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
            let updated = sqlx::query_as::<_, Job>(&format!(
                r#"
                UPDATE jobs
                SET retry_count = LEAST(retry_count + 1, $2),
                    status = CASE WHEN retry_count + 1 < $2 THEN 'pending' ELSE status END,
                    updated_at = $3
                WHERE request_id = $1
                  AND status IN ('pending', 'processing')
                RETURNING {JOB_COLUMNS}
                "#
            ))
            .bind(&request_id)
            .bind(i32::try_from(max_retries).unwrap_or(i32::MAX))
            .bind(now)
            .fetch_optional(&*self.pool)
            .await?;

            self.settle(&request_id, updated).await
        })
    }

    fn purge_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                DELETE FROM jobs
                WHERE status IN ('complete', 'failed')
                  AND updated_at < $1
                "#,
            )
            .bind(cutoff)
            .execute(&*self.pool)
            .await?;

            Ok(result.rows_affected())
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.pool).await?;
            Ok(())
        })
    }
}
