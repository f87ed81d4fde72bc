//! Worker pool management with structured concurrency.
//!
//! Provides lifecycle management and graceful shutdown for the dispatch
//! workers and the retention sweeper.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DispatchError, Result},
    housekeeping::RetentionSweeper,
    worker::{DispatchContext, DispatchWorker},
};

/// Supervises the tasks of one running engine.
pub struct WorkerPool {
    context: Arc<DispatchContext>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    sweeper_handle: Option<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(context: Arc<DispatchContext>, cancellation_token: CancellationToken) -> Self {
        Self { context, cancellation_token, worker_handles: Vec::new(), sweeper_handle: None }
    }

    /// Spawns all configured workers and the retention sweeper.
    ///
    /// Returns immediately after spawning.
    pub async fn spawn_workers(&mut self) {
        let worker_count = self.context.config.worker_count;
        info!(worker_count, "spawning dispatch workers");

        self.context.stats.write().await.active_workers = worker_count;

        for worker_id in 0..worker_count {
            let worker =
                DispatchWorker::new(worker_id, self.context.clone(), self.cancellation_token.clone());

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "dispatch worker terminated with error");
                }
                result
            });
            self.worker_handles.push(handle);
        }

        if let Some(retention) = self.context.config.retention {
            let sweeper = RetentionSweeper::new(
                self.context.store.clone(),
                retention,
                self.context.stats.clone(),
                self.cancellation_token.clone(),
                self.context.clock.clone(),
            );
            self.sweeper_handle = Some(tokio::spawn(async move { sweeper.run().await }));
        }

        info!(spawned_workers = self.worker_handles.len(), "all dispatch workers spawned");
    }

    /// Gracefully shuts down all workers.
    ///
    /// Signals cancellation, then waits for each worker to finish its current
    /// message within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the workers do not stop in time.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let sweeper = self.sweeper_handle.take();
        let stats = self.context.stats.clone();

        let shutdown_future = async move {
            let mut failures = Vec::new();

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                        failures.push(DispatchError::WorkerPanic {
                            worker_id,
                            error: join_error.to_string(),
                        });
                    },
                }
            }

            if let Some(handle) = sweeper {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "retention sweeper panicked during shutdown");
                }
            }

            stats.write().await.active_workers = 0;
            failures
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(failures) => {
                if !failures.is_empty() {
                    warn!(panicked = failures.len(), "some workers panicked during shutdown");
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DispatchError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Returns true if any worker is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active_count,
                "WorkerPool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}
