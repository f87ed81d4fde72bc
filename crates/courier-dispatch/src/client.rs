//! HTTP client for vendor dispatch.
//!
//! Sends `POST {base_url}/process` with the job's request ID and payload and
//! classifies the reply. A 2xx body decides between a synchronous result, a
//! synchronous business failure and an asynchronous acknowledgment. Transport
//! failures and non-2xx statuses become dispatch failures for the retry
//! scheduler.

use std::time::{Duration, Instant};

use courier_core::{Outcome, RequestId};
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DispatchError, Result},
    vendor::VendorConfig,
};

/// Largest response body kept in error details.
const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Configuration for the vendor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// User agent string for requests.
    pub user_agent: String,
    /// Upper bound on any request; vendors apply their own shorter timeouts.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { user_agent: "VendorWorker/1.0".to_string(), timeout: Duration::from_secs(30) }
    }
}

/// Classified vendor reply.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorReply {
    /// The vendor answered with a result or a business failure.
    Completed(Outcome),
    /// The vendor accepted the job and will call the webhook later.
    Accepted,
}

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    request_id: &'a RequestId,
    payload: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    status: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// HTTP client shared by all workers.
#[derive(Debug, Clone)]
pub struct VendorClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl VendorClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DispatchError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dispatches one job to a vendor.
    ///
    /// # Errors
    ///
    /// Returns a dispatch failure:
    /// - `NetworkError` for connection failures
    /// - `Timeout` when the vendor's timeout elapses
    /// - `RateLimited` for 429
    /// - `ClientError` for other 4xx
    /// - `ServerError` for 5xx
    /// - `MalformedResponse` for a 2xx body with no recognizable status
    pub async fn dispatch(
        &self,
        vendor: &VendorConfig,
        request_id: &RequestId,
        payload: &Value,
    ) -> Result<VendorReply> {
        let span = info_span!(
            "vendor_dispatch",
            request_id = %request_id,
            vendor = %vendor.name,
            url = %vendor.process_url(),
        );

        async move {
            let start_time = Instant::now();
            debug!("dispatching job to vendor");

            let response = self
                .client
                .post(vendor.process_url())
                .timeout(vendor.timeout)
                .json(&DispatchBody { request_id, payload })
                .send()
                .await
                .map_err(|e| {
                    warn!(duration_ms = start_time.elapsed().as_millis(), "request failed: {}", e);
                    if e.is_timeout() {
                        DispatchError::timeout(vendor.timeout)
                    } else if e.is_connect() {
                        DispatchError::network(format!("connection failed: {e}"))
                    } else {
                        DispatchError::network(e.to_string())
                    }
                })?;

            debug!(
                status = response.status().as_u16(),
                duration_ms = start_time.elapsed().as_millis(),
                "received vendor response"
            );

            classify(response).await
        }
        .instrument(span)
        .await
    }
}

async fn classify(response: Response) -> Result<VendorReply> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_seconds = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        return Err(DispatchError::rate_limited(retry_after_seconds));
    }

    let body = response
        .text()
        .await
        .map_err(|e| DispatchError::network(format!("failed to read response body: {e}")))?;

    match status.as_u16() {
        200..=299 => parse_reply(status, &body),
        400..=499 => Err(DispatchError::client_error(status.as_u16(), truncate(body))),
        500..=599 => Err(DispatchError::server_error(status.as_u16(), truncate(body))),
        other => Err(DispatchError::malformed(format!("unexpected HTTP status {other}"))),
    }
}

fn parse_reply(status: StatusCode, body: &str) -> Result<VendorReply> {
    let reply: ReplyBody = match serde_json::from_str(body) {
        Ok(reply) => reply,
        Err(_) if status == StatusCode::ACCEPTED => return Ok(VendorReply::Accepted),
        Err(e) => return Err(DispatchError::malformed(format!("invalid JSON body: {e}"))),
    };

    match reply.status.as_str() {
        "success" => Ok(VendorReply::Completed(Outcome::from_reported("success", reply.data, None))),
        "error" => Ok(VendorReply::Completed(Outcome::Failure {
            message: reply.error.as_ref().and_then(error_text),
        })),
        "accepted" => Ok(VendorReply::Accepted),
        _ if status == StatusCode::ACCEPTED => Ok(VendorReply::Accepted),
        other => Err(DispatchError::malformed(format!("unknown reply status: {other}"))),
    }
}

fn error_text(error: &Value) -> Option<String> {
    match error {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(message)) => Some(message.clone()),
            _ => Some(error.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_SIZE {
        let mut cut = MAX_ERROR_BODY_SIZE;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("... (truncated)");
    }
    body
}
