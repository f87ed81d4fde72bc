//! Error types for job dispatch.
//!
//! Vendor-facing failures (network, timeout, HTTP status, malformed replies)
//! are dispatch failures and feed the retry scheduler. Storage and queue
//! failures are infrastructure errors: the worker logs them, backs off and
//! leaves the job untouched.

use std::{fmt, time::Duration};

use courier_core::CoreError;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error conditions raised while dispatching and reconciling jobs.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// Vendor could not be reached.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Vendor did not answer within its timeout.
    #[error("request timeout after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Vendor rejected the request (4xx other than 429).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Vendor failed internally (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Vendor throttled the request.
    #[error("rate limited by vendor")]
    RateLimited {
        /// Value of the Retry-After header, if the vendor sent one
        retry_after_seconds: Option<u64>,
    },

    /// Vendor answered 2xx with a body that matches no known reply shape.
    #[error("malformed vendor response: {message}")]
    MalformedResponse {
        /// What was wrong with the body
        message: String,
    },

    /// No job exists for the request ID.
    #[error("job not found: {request_id}")]
    JobNotFound {
        /// Request ID that was looked up
        request_id: String,
    },

    /// Retry budget spent; the job has been failed.
    #[error("Max retries reached: {last_error}")]
    RetriesExhausted {
        /// Attempts recorded against the job
        attempts: u32,
        /// Description of the final dispatch failure
        last_error: String,
    },

    /// Store or queue failure.
    #[error("infrastructure failure: {message}")]
    InfrastructureError {
        /// Underlying storage or queue error
        message: String,
    },

    /// Invalid engine or vendor configuration.
    #[error("invalid configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker that panicked
        worker_id: usize,
        /// Panic payload rendered as text
        error: String,
    },
}

impl DispatchError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse { message: message.into() }
    }

    /// Creates a not-found error for a request ID.
    pub fn not_found(request_id: impl fmt::Display) -> Self {
        Self::JobNotFound { request_id: request_id.to_string() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Returns true for failures of a single vendor call.
    ///
    /// These are the errors the retry scheduler consumes.
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::Timeout { .. }
                | Self::ClientError { .. }
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
                | Self::MalformedResponse { .. }
        )
    }

    /// Returns true for store and queue failures.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::InfrastructureError { .. })
    }
}

impl From<CoreError> for DispatchError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::NotFound(request_id) => Self::JobNotFound { request_id },
            other => Self::InfrastructureError { message: other.to_string() },
        }
    }
}

/// Category of dispatch error for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Vendor throttling.
    RateLimit,
    /// Unrecognized vendor reply.
    Protocol,
    /// Unknown job.
    NotFound,
    /// Retry budget spent.
    Exhausted,
    /// Store and queue.
    Infrastructure,
    /// Configuration problems.
    Configuration,
    /// Worker lifecycle.
    Internal,
}

impl From<&DispatchError> for ErrorCategory {
    fn from(error: &DispatchError) -> Self {
        match error {
            DispatchError::NetworkError { .. } | DispatchError::Timeout { .. } => Self::Network,
            DispatchError::ClientError { .. } => Self::Client,
            DispatchError::ServerError { .. } => Self::Server,
            DispatchError::RateLimited { .. } => Self::RateLimit,
            DispatchError::MalformedResponse { .. } => Self::Protocol,
            DispatchError::JobNotFound { .. } => Self::NotFound,
            DispatchError::RetriesExhausted { .. } => Self::Exhausted,
            DispatchError::InfrastructureError { .. } => Self::Infrastructure,
            DispatchError::ConfigurationError { .. } => Self::Configuration,
            DispatchError::ShutdownTimeout { .. } | DispatchError::WorkerPanic { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Protocol => write!(f, "protocol"),
            Self::NotFound => write!(f, "not_found"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
