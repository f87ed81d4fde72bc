//! Job queue abstraction.
//!
//! Pops are reliable: a popped message moves to an in-flight set and stays
//! there until the consumer acknowledges it. A consumer that dies between pop
//! and acknowledgment leaves the message in flight, and
//! `recover_inflight` puts it back on the queue at the next startup.
//! Redelivery is harmless because the worker refuses to reprocess terminal
//! jobs.

use std::{future::Future, pin::Pin, time::Duration};

use crate::{error::Result, models::QueueMessage};

pub mod memory;
pub mod redis;

pub use self::{memory::MemoryJobQueue, redis::RedisJobQueue};

/// Default list name for queued jobs.
pub const DEFAULT_QUEUE_NAME: &str = "job_queue";

/// A popped message that has not been acknowledged yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    /// The decoded message.
    pub message: QueueMessage,
    receipt: String,
}

impl Lease {
    /// Wraps a message with the adapter-specific receipt needed to ack it.
    pub fn new(message: QueueMessage, receipt: impl Into<String>) -> Self {
        Self { message, receipt: receipt.into() }
    }

    /// Adapter-specific acknowledgment handle.
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

/// Queue operations required by producers and the worker loop.
pub trait JobQueue: Send + Sync + 'static {
    /// Appends a message to the queue.
    fn push(&self, message: QueueMessage) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Waits up to `timeout` for a message.
    ///
    /// Returns `None` when the wait elapses with the queue still empty.
    fn pop(
        &self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Lease>>> + Send + '_>>;

    /// Removes a leased message from the in-flight set.
    fn ack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns a leased message to the consuming end of the queue so it is
    /// redelivered next.
    fn nack(&self, lease: Lease) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Moves every unacknowledged message back onto the queue.
    ///
    /// Returns how many messages were restored. Call only while no consumer
    /// is running.
    fn recover_inflight(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>>;

    /// Verifies the queue transport is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
