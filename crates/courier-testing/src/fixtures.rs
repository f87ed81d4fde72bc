//! Job fixtures with sensible defaults.

use chrono::{DateTime, Utc};
use courier_core::{Job, JobStatus, RequestId};
use serde_json::{json, Value};

/// Builder for jobs in any lifecycle state.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    request_id: RequestId,
    payload: Value,
    status: JobStatus,
    vendor: Option<String>,
    retry_count: u32,
    result: Option<Value>,
    error_message: Option<String>,
}

impl JobBuilder {
    /// Pending job with a random request ID and a small payload.
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            payload: json!({"customer_id": "cus_123", "amount": 4200}),
            status: JobStatus::Pending,
            vendor: None,
            retry_count: 0,
            result: None,
            error_message: None,
        }
    }

    /// Sets the request ID.
    #[must_use]
    pub fn request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Marks the job as processing on `vendor`.
    #[must_use]
    pub fn processing(mut self, vendor: impl Into<String>) -> Self {
        self.status = JobStatus::Processing;
        self.vendor = Some(vendor.into());
        self
    }

    /// Marks the job complete with `result`.
    #[must_use]
    pub fn complete(mut self, result: Value) -> Self {
        self.status = JobStatus::Complete;
        self.result = Some(result);
        self.error_message = None;
        self
    }

    /// Marks the job failed with `message`.
    #[must_use]
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.result = None;
        self
    }

    /// Sets the retry counter.
    #[must_use]
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Builds the job with every timestamp set to `now`.
    pub fn build(self, now: DateTime<Utc>) -> Job {
        let mut job = Job::new(self.request_id, self.payload, now);
        job.status = self.status;
        job.vendor = self.vendor;
        job.retry_count = self.retry_count;
        job.result = self.result;
        job.error_message = self.error_message;

        match job.status {
            JobStatus::Pending => {},
            JobStatus::Processing => job.started_processing_at = Some(now),
            JobStatus::Complete => {
                job.completed_at = Some(now);
                job.vendor_response_received_at = Some(now);
            },
            JobStatus::Failed => {
                job.failed_at = Some(now);
                job.vendor_response_received_at = Some(now);
            },
        }
        job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Body an asynchronous vendor posts to the webhook endpoint.
pub fn webhook_body(request_id: &RequestId, status: &str, data: Value) -> Value {
    json!({"request_id": request_id, "status": status, "data": data})
}
