//! Retention sweep for terminal jobs.

use std::{sync::Arc, time::Duration};

use courier_core::{Clock, JobStore};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    error::{DispatchError, Result},
    worker::EngineStats,
};

/// How long terminal jobs are kept and how often the sweep runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Age after which a terminal job is deleted, measured from its last update.
    pub retention: Duration,
    /// Pause between sweeps.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Periodically deletes expired terminal jobs.
pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    config: RetentionConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    /// Creates a sweeper.
    pub fn new(
        store: Arc<dyn JobStore>,
        config: RetentionConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, config, stats, cancellation_token, clock }
    }

    /// Sweeps once per interval until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns an error; failed sweeps are logged and retried on the
    /// next tick.
    pub async fn run(&self) -> Result<()> {
        info!(
            retention_days = self.config.retention.as_secs() / 86_400,
            interval_seconds = self.config.interval.as_secs(),
            "retention sweeper starting"
        );

        loop {
            tokio::select! {
                () = self.clock.sleep(self.config.interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }

            if let Err(error) = self.sweep_once().await {
                error!(error = %error, "retention sweep failed");
            }
        }

        debug!("retention sweeper stopped");
        Ok(())
    }

    /// Deletes terminal jobs last updated before `now - retention`.
    ///
    /// # Errors
    ///
    /// Returns `InfrastructureError` if the store fails.
    pub async fn sweep_once(&self) -> Result<u64> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| DispatchError::configuration(format!("invalid retention: {e}")))?;
        let cutoff = self.clock.now_utc() - retention;

        let purged = self.store.purge_expired(cutoff).await?;
        if purged > 0 {
            info!(purged, cutoff = %cutoff, "expired jobs purged");
            self.stats.write().await.jobs_purged += purged;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{Job, MemoryJobStore, RequestId, TestClock};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn sweep_removes_only_expired_terminal_jobs() {
        let store = MemoryJobStore::new();
        let clock = TestClock::new();
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let sweeper = RetentionSweeper::new(
            Arc::new(store.clone()),
            RetentionConfig::default(),
            stats.clone(),
            CancellationToken::new(),
            Arc::new(clock.clone()),
        );

        let old = RequestId::from("old");
        store.create(Job::new(old.clone(), json!({}), clock.now_utc())).await.unwrap();
        store
            .finalize(
                &old,
                courier_core::Resolution::Failed { error_message: "x".into() },
                clock.now_utc(),
            )
            .await
            .unwrap();
        let open = RequestId::from("open");
        store.create(Job::new(open.clone(), json!({}), clock.now_utc())).await.unwrap();

        clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
        let purged = sweeper.sweep_once().await.unwrap();

        assert_eq!(purged, 1);
        assert!(store.find(&old).await.unwrap().is_none());
        assert!(store.find(&open).await.unwrap().is_some());
        assert_eq!(stats.read().await.jobs_purged, 1);
    }

    #[tokio::test]
    async fn recent_terminal_jobs_are_kept() {
        let store = MemoryJobStore::new();
        let clock = TestClock::new();
        let sweeper = RetentionSweeper::new(
            Arc::new(store.clone()),
            RetentionConfig::default(),
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
            Arc::new(clock.clone()),
        );
        let id = RequestId::from("fresh");
        store.create(Job::new(id.clone(), json!({}), clock.now_utc())).await.unwrap();
        store
            .finalize(&id, courier_core::Resolution::Complete { result: json!({}) }, clock.now_utc())
            .await
            .unwrap();

        clock.advance(Duration::from_secs(24 * 60 * 60));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
