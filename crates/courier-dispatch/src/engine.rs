//! Dispatch engine and job submission.

use std::sync::Arc;

use courier_core::{Clock, Job, JobQueue, JobStore, QueueMessage, RequestId};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    error::Result,
    reconcile::Reconciler,
    worker::{DispatchConfig, DispatchContext, DispatchWorker, EngineStats},
    worker_pool::WorkerPool,
};

/// Main engine coordinating dispatch workers.
pub struct DispatchEngine {
    context: Arc<DispatchContext>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl DispatchEngine {
    /// Creates an engine over the given store and queue.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the vendor list is empty, a vendor
    /// name repeats, a rate limit is zero or the HTTP client cannot be built.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        config: DispatchConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let context = DispatchContext::new(store, queue, config, clock)?;
        Ok(Self {
            context: Arc::new(context),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
        })
    }

    /// Recovers in-flight messages and starts the worker pool.
    ///
    /// Messages leased by a previous process that never acknowledged them
    /// are put back on the queue first. Returns immediately after spawning
    /// workers; use `shutdown()` to stop them.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if in-flight recovery fails.
    pub async fn start(&mut self) -> Result<()> {
        let recovered = self.context.queue.recover_inflight().await?;
        if recovered > 0 {
            info!(recovered, "restored unacknowledged messages to the queue");
        }

        info!(
            worker_count = self.context.config.worker_count,
            vendors = self.context.config.vendors.len(),
            selection = ?self.context.config.vendor_selection,
            "starting dispatch engine"
        );

        let mut worker_pool = WorkerPool::new(self.context.clone(), self.cancellation_token.clone());
        worker_pool.spawn_workers().await;
        self.worker_pool = Some(worker_pool);

        info!("dispatch engine started successfully");
        Ok(())
    }

    /// Gracefully shuts down the engine.
    ///
    /// Workers finish their current message and stop. Pending retry timers
    /// are not awaited; their leases stay in flight and are recovered at the
    /// next start.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not stop within the configured
    /// shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down dispatch engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.context.config.shutdown_timeout).await?;
        } else {
            info!("dispatch engine was not started, shutdown completed immediately");
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.context.stats.read().await.clone()
    }

    /// Shared statistics that stay readable after `shutdown()` consumes the
    /// engine.
    pub fn stats_handle(&self) -> Arc<RwLock<EngineStats>> {
        self.context.stats.clone()
    }

    /// Reconciler sharing this engine's store, sanitizer and clock.
    pub fn reconciler(&self) -> Reconciler {
        self.context.reconciler.clone()
    }

    /// Pops and processes at most one message on the calling task.
    ///
    /// Does not start background workers. Returns whether a message was
    /// handled.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the store or queue fails.
    pub async fn process_next(&self) -> Result<bool> {
        let worker = DispatchWorker::new(0, self.context.clone(), self.cancellation_token.clone());
        worker.process_next().await
    }
}

/// Creates jobs and enqueues their first message.
#[derive(Clone)]
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl JobSubmitter {
    /// Creates a submitter.
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { store, queue, clock }
    }

    /// Submits a payload under a freshly generated request ID.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the store or queue fails.
    pub async fn submit(&self, payload: Value) -> Result<RequestId> {
        let request_id = RequestId::new();
        self.submit_with_id(request_id.clone(), payload).await?;
        Ok(request_id)
    }

    /// Submits a payload under a caller-chosen request ID.
    ///
    /// The job row is written before the message is queued, so a worker never
    /// sees a message for a job that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the ID is already taken or the store
    /// or queue fails.
    pub async fn submit_with_id(&self, request_id: RequestId, payload: Value) -> Result<()> {
        let job = Job::new(request_id.clone(), payload.clone(), self.clock.now_utc());
        self.store.create(job).await?;
        self.queue.push(QueueMessage::initial(request_id.clone(), payload)).await?;

        info!(request_id = %request_id, "job submitted");
        Ok(())
    }
}
