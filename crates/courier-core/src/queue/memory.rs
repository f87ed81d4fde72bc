//! In-process job queue used by tests and single-binary setups.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::sync::{Mutex, Notify};

use super::{JobQueue, Lease};
use crate::{
    error::{CoreError, Result},
    models::QueueMessage,
};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<QueueMessage>,
    inflight: HashMap<u64, QueueMessage>,
    next_receipt: u64,
    injected_error: Option<String>,
}

/// FIFO queue with the same lease semantics as the Redis adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting to be popped.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Returns true if no messages are waiting.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.ready.is_empty()
    }

    /// Number of popped but unacknowledged messages.
    pub async fn inflight_len(&self) -> usize {
        self.state.lock().await.inflight.len()
    }

    /// Snapshot of waiting messages in pop order.
    pub async fn pending_messages(&self) -> Vec<QueueMessage> {
        self.state.lock().await.ready.iter().cloned().collect()
    }

    /// Makes the next queue operation fail with a queue error.
    pub async fn inject_error(&self, message: impl Into<String>) {
        self.state.lock().await.injected_error = Some(message.into());
    }

    async fn try_take(&self) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.injected_error.take() {
            return Err(CoreError::Queue(message));
        }

        let Some(message) = state.ready.pop_front() else {
            return Ok(None);
        };
        let receipt = state.next_receipt;
        state.next_receipt += 1;
        state.inflight.insert(receipt, message.clone());
        Ok(Some(Lease::new(message, receipt.to_string())))
    }
}

impl JobQueue for MemoryJobQueue {
    fn push(&self, message: QueueMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            {
                let mut state = self.state.lock().await;
                if let Some(error) = state.injected_error.take() {
                    return Err(CoreError::Queue(error));
                }
                state.ready.push_back(message);
            }
            self.notify.notify_one();
            Ok(())
        })
    }

    fn pop(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Lease>>> + Send + '_>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                if let Some(lease) = self.try_take().await? {
                    return Ok(Some(lease));
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }

    fn ack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let receipt: u64 = lease
                .receipt()
                .parse()
                .map_err(|_| CoreError::Queue(format!("invalid receipt: {}", lease.receipt())))?;
            self.state.lock().await.inflight.remove(&receipt);
            Ok(())
        })
    }

    fn nack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let receipt: u64 = lease
                .receipt()
                .parse()
                .map_err(|_| CoreError::Queue(format!("invalid receipt: {}", lease.receipt())))?;
            {
                let mut state = self.state.lock().await;
                if let Some(error) = state.injected_error.take() {
                    return Err(CoreError::Queue(error));
                }
                let message = state.inflight.remove(&receipt).unwrap_or(lease.message);
                state.ready.push_front(message);
            }
            self.notify.notify_one();
            Ok(())
        })
    }

    fn recover_inflight(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>> {
        Box::pin(async move {
            let restored = {
                let mut state = self.state.lock().await;
                let mut inflight: Vec<(u64, QueueMessage)> = state.inflight.drain().collect();
                inflight.sort_by_key(|(receipt, _)| *receipt);
                let restored = inflight.len();
                for (_, message) in inflight.into_iter().rev() {
                    state.ready.push_front(message);
                }
                restored
            };
            if restored > 0 {
                self.notify.notify_one();
            }
            Ok(restored)
        })
    }

    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            match self.state.lock().await.injected_error.take() {
                Some(error) => Err(CoreError::Queue(error)),
                None => Ok(()),
            }
        })
    }
}
