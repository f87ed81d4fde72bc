//! Job records, lifecycle states and queue messages.
//!
//! A `Job` is the authoritative record of one unit of work. Its `request_id`
//! is immutable and doubles as the idempotency key for every writer: the
//! worker loop, the retry scheduler and the vendor webhook all address the
//! job through it. Queue messages only reference a job; losing or
//! duplicating one never corrupts the record.
//!
//! The `Job::begin_attempt`, `Job::resolve` and `Job::record_retry` methods
//! describe the conditional transitions every store must implement
//! atomically. The in-memory store calls them under its write lock; the
//! PostgreSQL store expresses the same rules as conditional `UPDATE`s.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgRow = sqlx::postgres::PgRow;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Unique, immutable job identifier.
///
/// Generated as a UUID v4 string when a job is submitted. Vendors echo it
/// back in webhooks, so any string is accepted on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Creates a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl sqlx::Type<PgDb> for RequestId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RequestId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(s))
    }
}

impl sqlx::Encode<'_, PgDb> for RequestId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Lifecycle state of a job.
///
/// `Complete` and `Failed` are terminal: once a job reaches either, no
/// writer may change its status, result or error message again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created or waiting for a retry.
    Pending,

    /// Handed to a vendor, or waiting for an asynchronous vendor's webhook.
    Processing,

    /// Vendor reported success; `result` holds the sanitized data.
    Complete,

    /// Vendor reported failure or retries ran out; `error_message` is set.
    Failed,
}

impl JobStatus {
    /// Returns true for `Complete` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

/// Outcome reported by a vendor, either inline or through a webhook.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Vendor produced a result. The data is sanitized before it is stored.
    Success(Value),

    /// Vendor reported a failure, optionally with its own message.
    Failure {
        /// Vendor-supplied error text.
        message: Option<String>,
    },
}

impl Outcome {
    /// Maps a vendor-reported status and data to an outcome.
    ///
    /// `success` only counts when the data is present and truthy: absent,
    /// `null`, `false`, `0` and `""` turn it into a failure carrying
    /// `message`. Every other status is a failure as well.
    pub fn from_reported(status: &str, data: Option<Value>, message: Option<String>) -> Self {
        match data {
            Some(data) if status == "success" && is_truthy(&data) => Self::Success(data),
            _ => Self::Failure { message },
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Terminal write applied to a job, already sanitized and defaulted.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Mark the job complete with this result.
    Complete {
        /// Sanitized vendor data.
        result: Value,
    },

    /// Mark the job failed with this message.
    Failed {
        /// Human-readable failure description.
        error_message: String,
    },
}

impl Resolution {
    /// Status the job will carry after this resolution is applied.
    pub const fn status(&self) -> JobStatus {
        match self {
            Self::Complete { .. } => JobStatus::Complete,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// Authoritative job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Idempotency key shared by every writer.
    pub request_id: RequestId,

    /// Opaque work description forwarded to the vendor.
    pub payload: Value,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Vendor chosen for the most recent attempt.
    pub vendor: Option<String>,

    /// Sanitized vendor data. Present iff `status` is `Complete`.
    pub result: Option<Value>,

    /// Failure description. Present iff `status` is `Failed`.
    pub error_message: Option<String>,

    /// Number of dispatch failures recorded so far.
    pub retry_count: u32,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When any field last changed.
    pub updated_at: DateTime<Utc>,

    /// When the latest attempt began.
    pub started_processing_at: Option<DateTime<Utc>>,

    /// When the job completed.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the job failed.
    pub failed_at: Option<DateTime<Utc>>,

    /// When the outcome that finalized the job arrived.
    pub vendor_response_received_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a pending job.
    pub fn new(request_id: RequestId, payload: Value, now: DateTime<Utc>) -> Self {
        Self {
            request_id,
            payload,
            status: JobStatus::Pending,
            vendor: None,
            result: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            started_processing_at: None,
            completed_at: None,
            failed_at: None,
            vendor_response_received_at: None,
        }
    }

    /// Returns true once the job is complete or failed.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job to processing for a new attempt against `vendor`.
    ///
    /// Returns false and leaves the job untouched if it is terminal.
    pub fn begin_attempt(&mut self, vendor: &str, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Processing;
        self.vendor = Some(vendor.to_string());
        self.started_processing_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Applies a terminal resolution.
    ///
    /// Returns false and leaves the job untouched if it is already terminal.
    pub fn resolve(&mut self, resolution: &Resolution, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        match resolution {
            Resolution::Complete { result } => {
                self.result = Some(result.clone());
                self.completed_at = Some(now);
            },
            Resolution::Failed { error_message } => {
                self.error_message = Some(error_message.clone());
                self.failed_at = Some(now);
            },
        }
        self.status = resolution.status();
        self.vendor_response_received_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Counts one dispatch failure.
    ///
    /// The counter never exceeds `max_retries`. While it stays below the
    /// bound the job returns to pending; at the bound the status is left for
    /// the caller to finalize. Returns false if the job is terminal.
    pub fn record_retry(&mut self, max_retries: u32, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let next = self.retry_count.saturating_add(1);
        self.retry_count = next.min(max_retries);
        if next < max_retries {
            self.status = JobStatus::Pending;
        }
        self.updated_at = now;
        true
    }

    /// Returns true if another attempt is allowed under `max_retries`.
    pub fn has_retries_left(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }
}

impl<'r> sqlx::FromRow<'r, PgRow> for Job {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        Ok(Self {
            request_id: row.try_get("request_id")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            vendor: row.try_get("vendor")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            retry_count: {
                let val: i32 = row.try_get("retry_count")?;
                val.try_into()
                    .map_err(|_| sqlx::Error::Decode("retry_count cannot be negative".into()))?
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_processing_at: row.try_get("started_processing_at")?,
            completed_at: row.try_get("completed_at")?,
            failed_at: row.try_get("failed_at")?,
            vendor_response_received_at: row.try_get("vendor_response_received_at")?,
        })
    }
}

/// Transient queue entry referencing a job.
///
/// Non-authoritative: the worker always re-reads the job before acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Job this message refers to.
    pub request_id: RequestId,

    /// Copy of the job payload at enqueue time.
    #[serde(default)]
    pub payload: Value,

    /// Whether this message was produced by the retry scheduler.
    #[serde(default)]
    pub retry: bool,

    /// Retry count at the time of re-enqueue.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueMessage {
    /// First message for a newly submitted job.
    pub fn initial(request_id: RequestId, payload: Value) -> Self {
        Self { request_id, payload, retry: false, retry_count: 0 }
    }

    /// Message re-enqueued by the retry scheduler.
    pub fn retry(request_id: RequestId, payload: Value, retry_count: u32) -> Self {
        Self { request_id, payload, retry: true, retry_count }
    }
}
