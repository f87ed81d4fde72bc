//! Dispatch worker loop.
//!
//! Each worker pops one leased message at a time, moves the job to
//! processing, waits for a rate-limit slot and calls the chosen vendor. The
//! reply decides what happens next:
//!
//! - a synchronous result or business failure is reconciled immediately,
//! - an asynchronous acknowledgment leaves the job processing until the
//!   vendor calls the webhook,
//! - a dispatch failure goes to the retry scheduler.
//!
//! The lease is acknowledged once its outcome is durable. Store and queue
//! errors are logged, the message is handed back to the queue and the worker
//! backs off before its next pop.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, JobQueue, JobStore, Lease, Sanitizer, UpdateOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, VendorClient, VendorReply},
    error::{DispatchError, ErrorCategory, Result},
    housekeeping::RetentionConfig,
    rate_limit::{RateLimit, RateLimiter},
    reconcile::{Reconciler, Reconciliation},
    retry::{RetryDecision, RetryPolicy, RetryScheduler},
    vendor::{VendorConfig, VendorMode, VendorSelection, VendorSelector},
};

/// Configuration for the dispatch engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// How long one pop waits for a message. Bounds shutdown latency.
    pub pop_timeout: Duration,

    /// Pause after an infrastructure error.
    pub error_backoff: Duration,

    /// How often a worker re-checks a full rate-limit window.
    pub rate_limit_poll_interval: Duration,

    /// Retry limits for dispatch failures.
    pub retry_policy: RetryPolicy,

    /// Downstream vendors.
    pub vendors: Vec<VendorConfig>,

    /// How a vendor is chosen for each attempt.
    pub vendor_selection: VendorSelection,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Field names stripped from vendor results.
    pub sensitive_fields: Vec<String>,

    /// Purge of old terminal jobs; `None` disables it. Keep it off under
    /// `TestClock`, whose sleeps return at once.
    pub retention: Option<RetentionConfig>,

    /// Maximum time to wait for workers to stop.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            pop_timeout: Duration::from_secs(crate::DEFAULT_POP_TIMEOUT_SECONDS),
            error_backoff: Duration::from_secs(5),
            rate_limit_poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            vendors: default_vendors(),
            vendor_selection: VendorSelection::default(),
            client_config: ClientConfig::default(),
            sensitive_fields: courier_core::sanitize::DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            retention: Some(RetentionConfig::default()),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// The two mock vendors used in local setups.
pub fn default_vendors() -> Vec<VendorConfig> {
    vec![
        VendorConfig::new("sync", "http://localhost:3001", VendorMode::Sync)
            .with_rate_limit(RateLimit::per_minute(30)),
        VendorConfig::new("async", "http://localhost:3002", VendorMode::Async)
            .with_rate_limit(RateLimit::per_minute(20)),
    ]
}

/// Statistics for dispatch engine monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Number of running workers.
    pub active_workers: usize,
    /// Messages popped since startup.
    pub messages_processed: u64,
    /// Jobs finalized from a synchronous reply.
    pub sync_completions: u64,
    /// Jobs handed to an asynchronous vendor.
    pub async_acceptances: u64,
    /// Failed vendor calls.
    pub dispatch_failures: u64,
    /// Re-enqueue timers armed.
    pub retries_scheduled: u64,
    /// Jobs failed after the last retry.
    pub retries_exhausted: u64,
    /// Messages dropped because the job was missing or terminal.
    pub messages_dropped: u64,
    /// Store and queue failures.
    pub infrastructure_errors: u64,
    /// Terminal jobs removed by the retention sweep.
    pub jobs_purged: u64,
}

/// State shared by every worker of one engine.
pub(crate) struct DispatchContext {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) client: VendorClient,
    pub(crate) selector: VendorSelector,
    pub(crate) limiter: RateLimiter,
    pub(crate) reconciler: Reconciler,
    pub(crate) retries: RetryScheduler,
    pub(crate) stats: Arc<RwLock<EngineStats>>,
    pub(crate) config: DispatchConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl DispatchContext {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = VendorClient::new(config.client_config.clone())?;
        let selector = VendorSelector::new(config.vendors.clone(), config.vendor_selection)?;

        let mut limiter = RateLimiter::new(config.rate_limit_poll_interval, clock.clone());
        for vendor in &config.vendors {
            if let Some(rate_limit) = vendor.rate_limit {
                if rate_limit.limit == 0 {
                    return Err(DispatchError::configuration(format!(
                        "rate limit for vendor {} must admit at least one request",
                        vendor.name
                    )));
                }
                limiter = limiter.with_limit(vendor.name.clone(), rate_limit);
            }
        }

        let reconciler = Reconciler::new(
            store.clone(),
            Sanitizer::new(config.sensitive_fields.iter().cloned()),
            clock.clone(),
        );
        let retries = RetryScheduler::new(
            store.clone(),
            queue.clone(),
            reconciler.clone(),
            config.retry_policy,
            clock.clone(),
        );

        Ok(Self {
            store,
            queue,
            client,
            selector,
            limiter,
            reconciler,
            retries,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            config,
            clock,
        })
    }

    async fn record(&self, update: impl FnOnce(&mut EngineStats)) {
        update(&mut *self.stats.write().await);
    }
}

/// What to do with a lease once processing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settlement {
    /// Processing is finished; acknowledge now.
    Acknowledge,
    /// A retry timer owns the lease.
    Deferred,
}

/// Individual worker that dispatches queued jobs.
pub struct DispatchWorker {
    id: usize,
    context: Arc<DispatchContext>,
    cancellation_token: CancellationToken,
}

impl DispatchWorker {
    pub(crate) fn new(
        id: usize,
        context: Arc<DispatchContext>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Main worker loop; pops and processes messages until cancelled.
    ///
    /// Cancellation is observed between pops, so a worker stops at most one
    /// pop timeout after shutdown is requested.
    ///
    /// # Errors
    ///
    /// Never returns an error today. Processing errors are logged and the
    /// loop continues.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "dispatch worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "dispatch worker received shutdown signal");
                break;
            }

            if let Err(error) = self.process_next().await {
                error!(
                    worker_id = self.id,
                    error = %error,
                    category = %ErrorCategory::from(&error),
                    "dispatch iteration failed, backing off"
                );
                self.context.record(|stats| stats.infrastructure_errors += 1).await;

                tokio::select! {
                    () = self.context.clock.sleep(self.context.config.error_backoff) => {},
                    () = self.cancellation_token.cancelled() => break,
                }
            }
        }

        info!(worker_id = self.id, "dispatch worker stopped");
        Ok(())
    }

    /// Pops and processes at most one message.
    ///
    /// Returns whether a message was handled.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the store or queue fails. The message,
    /// if one was popped, has been handed back to the queue when possible.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(lease) = self.context.queue.pop(self.context.config.pop_timeout).await? else {
            return Ok(false);
        };
        self.context.record(|stats| stats.messages_processed += 1).await;

        match self.process(&lease).await {
            Ok(Settlement::Acknowledge) => {
                self.context.queue.ack(lease).await?;
            },
            Ok(Settlement::Deferred) => {},
            Err(error) => {
                let request_id = lease.message.request_id.clone();
                if let Err(nack_error) = self.context.queue.nack(lease).await {
                    warn!(
                        request_id = %request_id,
                        error = %nack_error,
                        "failed to return message, left for recovery"
                    );
                }
                return Err(error);
            },
        }
        Ok(true)
    }

    async fn process(&self, lease: &Lease) -> Result<Settlement> {
        let ctx = &self.context;
        let request_id = &lease.message.request_id;

        let previous_vendor = match ctx.selector.selection() {
            VendorSelection::Sticky => {
                ctx.store.find(request_id).await?.and_then(|job| job.vendor)
            },
            VendorSelection::Random => None,
        };
        let vendor = ctx.selector.select(previous_vendor.as_deref());

        let job = match ctx.store.begin_attempt(request_id, &vendor.name, ctx.clock.now_utc()).await? {
            UpdateOutcome::Applied(job) => job,
            UpdateOutcome::AlreadyFinalized(job) => {
                info!(
                    worker_id = self.id,
                    request_id = %request_id,
                    status = %job.status,
                    "job already finalized, dropping message"
                );
                ctx.record(|stats| stats.messages_dropped += 1).await;
                return Ok(Settlement::Acknowledge);
            },
            UpdateOutcome::NotFound => {
                warn!(worker_id = self.id, request_id = %request_id, "job not found, dropping message");
                ctx.record(|stats| stats.messages_dropped += 1).await;
                return Ok(Settlement::Acknowledge);
            },
        };

        debug!(
            worker_id = self.id,
            request_id = %request_id,
            vendor = %vendor.name,
            retry_count = job.retry_count,
            "attempt started"
        );

        ctx.limiter.acquire(&vendor.name).await;

        match ctx.client.dispatch(vendor, request_id, &job.payload).await {
            Ok(VendorReply::Completed(outcome)) => {
                match ctx.reconciler.reconcile(request_id, outcome).await {
                    Ok(Reconciliation::Applied(job)) => {
                        info!(
                            worker_id = self.id,
                            request_id = %request_id,
                            vendor = %vendor.name,
                            status = %job.status,
                            "synchronous vendor reply recorded"
                        );
                        ctx.record(|stats| stats.sync_completions += 1).await;
                    },
                    Ok(Reconciliation::AlreadyFinalized(_)) => {
                        debug!(request_id = %request_id, "job finalized concurrently");
                    },
                    Err(DispatchError::JobNotFound { .. }) => {
                        warn!(request_id = %request_id, "job disappeared before reconciliation");
                    },
                    Err(error) => return Err(error),
                }
                Ok(Settlement::Acknowledge)
            },
            Ok(VendorReply::Accepted) => {
                info!(
                    worker_id = self.id,
                    request_id = %request_id,
                    vendor = %vendor.name,
                    "vendor accepted job, awaiting webhook"
                );
                ctx.record(|stats| stats.async_acceptances += 1).await;
                Ok(Settlement::Acknowledge)
            },
            Err(failure) if failure.is_dispatch_failure() => {
                ctx.record(|stats| stats.dispatch_failures += 1).await;
                match ctx.retries.handle_failure(lease, &failure).await? {
                    RetryDecision::Scheduled { .. } => {
                        ctx.record(|stats| stats.retries_scheduled += 1).await;
                        Ok(Settlement::Deferred)
                    },
                    RetryDecision::Exhausted { .. } => {
                        ctx.record(|stats| stats.retries_exhausted += 1).await;
                        Ok(Settlement::Acknowledge)
                    },
                    RetryDecision::Abandoned => Ok(Settlement::Acknowledge),
                }
            },
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{Job, JobStatus, MemoryJobQueue, MemoryJobStore, QueueMessage, RequestId, TestClock};
    use serde_json::json;

    use super::*;

    fn worker(store: &MemoryJobStore, queue: &MemoryJobQueue, vendors: Vec<VendorConfig>) -> DispatchWorker {
        let config = DispatchConfig {
            pop_timeout: Duration::from_millis(20),
            vendors,
            retention: None,
            ..Default::default()
        };
        let context = DispatchContext::new(
            Arc::new(store.clone()),
            Arc::new(queue.clone()),
            config,
            Arc::new(TestClock::new()),
        )
        .unwrap();
        DispatchWorker::new(0, Arc::new(context), CancellationToken::new())
    }

    #[test]
    fn default_config_matches_local_setup() {
        let config = DispatchConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.pop_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_policy.max_retries, 3);
        assert_eq!(config.vendors.len(), 2);
        assert_eq!(config.vendors[0].rate_limit, Some(RateLimit::per_minute(30)));
        assert_eq!(config.vendors[1].rate_limit, Some(RateLimit::per_minute(20)));
        assert!(config.sensitive_fields.iter().any(|f| f == "password"));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let config = DispatchConfig {
            vendors: vec![VendorConfig::new("sync", "http://localhost:1", VendorMode::Sync)
                .with_rate_limit(RateLimit::per_minute(0))],
            ..Default::default()
        };
        let result = DispatchContext::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryJobQueue::new()),
            config,
            Arc::new(TestClock::new()),
        );
        assert!(matches!(result, Err(DispatchError::ConfigurationError { .. })));
    }

    #[tokio::test]
    async fn empty_queue_reports_nothing_processed() {
        let store = MemoryJobStore::new();
        let queue = MemoryJobQueue::new();
        let worker = worker(&store, &queue, default_vendors());

        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn message_for_missing_job_is_dropped_and_acknowledged() {
        let store = MemoryJobStore::new();
        let queue = MemoryJobQueue::new();
        let worker = worker(&store, &queue, default_vendors());
        queue.push(QueueMessage::initial(RequestId::from("ghost"), json!({}))).await.unwrap();

        assert!(worker.process_next().await.unwrap());

        assert_eq!(queue.inflight_len().await, 0);
        assert_eq!(worker.context.stats.read().await.messages_dropped, 1);
    }

    #[tokio::test]
    async fn message_for_terminal_job_is_dropped_untouched() {
        let store = MemoryJobStore::new();
        let queue = MemoryJobQueue::new();
        let worker = worker(&store, &queue, default_vendors());
        let request_id = RequestId::from("done");
        store.create(Job::new(request_id.clone(), json!({}), chrono::Utc::now())).await.unwrap();
        worker.context.reconciler.fail(&request_id, "already failed").await.unwrap();
        let before = store.find(&request_id).await.unwrap().unwrap();
        queue.push(QueueMessage::initial(request_id.clone(), json!({}))).await.unwrap();

        worker.process_next().await.unwrap();

        let after = store.find(&request_id).await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(queue.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn store_failure_returns_message_to_queue() {
        let store = MemoryJobStore::new();
        let queue = MemoryJobQueue::new();
        let worker = worker(&store, &queue, default_vendors());
        queue.push(QueueMessage::initial(RequestId::from("req-1"), json!({}))).await.unwrap();
        store.inject_error("connection lost").await;

        let error = worker.process_next().await.unwrap_err();

        assert!(error.is_infrastructure());
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.inflight_len().await, 0);
    }

    #[tokio::test]
    async fn worker_stops_when_cancelled() {
        let store = MemoryJobStore::new();
        let queue = MemoryJobQueue::new();
        let worker = worker(&store, &queue, default_vendors());
        let token = worker.cancellation_token.clone();

        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
