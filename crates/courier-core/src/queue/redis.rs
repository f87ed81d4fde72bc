//! Redis list queue.
//!
//! Producers `LPUSH` JSON messages onto the queue list. Consumers `BLMOVE`
//! from its tail onto a companion `<queue>:processing` list and `LREM` the
//! exact payload once it is acknowledged. A negative acknowledgment moves the
//! payload back to the consuming end of the queue in one `MULTI` block.
//!
//! Blocking pops run on their own connections, one per concurrent consumer,
//! so they never stall commands on the shared connection.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use redis::{aio::MultiplexedConnection, AsyncCommands};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{JobQueue, Lease};
use crate::{error::Result, models::QueueMessage};

/// Shortest timeout handed to `BLMOVE`; zero would block forever.
const MIN_BLOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// Reliable queue on top of two Redis lists.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: redis::Client,
    connection: MultiplexedConnection,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    queue_name: String,
    processing_name: String,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("queue_name", &self.queue_name)
            .field("processing_name", &self.processing_name)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Connects to Redis and binds to the named queue list.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str, queue_name: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        let queue_name = queue_name.into();
        let processing_name = format!("{queue_name}:processing");
        Ok(Self {
            client,
            connection,
            blocking: Arc::new(Mutex::new(Vec::new())),
            queue_name,
            processing_name,
        })
    }

    /// Name of the list holding waiting messages.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Name of the list holding leased messages.
    pub fn processing_name(&self) -> &str {
        &self.processing_name
    }

    async fn checkout_blocking(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn take(&self, timeout: Duration) -> Result<Option<Lease>> {
        let mut blocking = self.checkout_blocking().await?;
        let raw: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue_name)
            .arg(&self.processing_name)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.max(MIN_BLOCK_TIMEOUT).as_secs_f64())
            .query_async(&mut blocking)
            .await?;
        // A connection that errored is dropped above, never pooled.
        self.blocking.lock().await.push(blocking);

        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut conn = self.connection.clone();

        match serde_json::from_str::<QueueMessage>(&raw) {
            Ok(message) => Ok(Some(Lease::new(message, raw))),
            Err(e) => {
                warn!(
                    queue = %self.queue_name,
                    error = %e,
                    "discarding undecodable queue message"
                );
                let _: usize = conn.lrem(&self.processing_name, 1, &raw).await?;
                Ok(None)
            },
        }
    }
}

impl JobQueue for RedisJobQueue {
    fn push(&self, message: QueueMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let json = serde_json::to_string(&message)?;
            let mut conn = self.connection.clone();
            let _: usize = conn.lpush(&self.queue_name, json).await?;

            debug!(request_id = %message.request_id, queue = %self.queue_name, "message queued");
            Ok(())
        })
    }

    fn pop(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Lease>>> + Send + '_>> {
        Box::pin(self.take(timeout))
    }

    fn ack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let removed: usize = conn.lrem(&self.processing_name, 1, lease.receipt()).await?;
            if removed == 0 {
                warn!(
                    request_id = %lease.message.request_id,
                    "acknowledged message was not in the processing list"
                );
            }
            Ok(())
        })
    }

    fn nack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let _: () = redis::pipe()
                .atomic()
                .lrem(&self.processing_name, 1, lease.receipt())
                .ignore()
                .rpush(&self.queue_name, lease.receipt())
                .ignore()
                .query_async(&mut conn)
                .await?;

            debug!(request_id = %lease.message.request_id, "message returned to queue");
            Ok(())
        })
    }

    fn recover_inflight(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let mut restored = 0;
            loop {
                let moved: Option<String> = redis::cmd("LMOVE")
                    .arg(&self.processing_name)
                    .arg(&self.queue_name)
                    .arg("LEFT")
                    .arg("RIGHT")
                    .query_async(&mut conn)
                    .await?;
                if moved.is_none() {
                    break;
                }
                restored += 1;
            }
            Ok(restored)
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut conn = self.connection.clone();
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
    }
}
