//! Job dispatch engine.
//!
//! Workers take job references off a reliable queue, forward each job to one
//! of several vendors and record the outcome. Synchronous vendors answer in
//! the HTTP reply; asynchronous vendors acknowledge and report later through
//! the webhook endpoint, which reconciles through the same [`Reconciler`].
//!
//! # Architecture
//!
//! 1. **Pop** - Worker leases one message, waiting at most the pop timeout
//! 2. **Begin attempt** - Conditional store write moves the job to
//!    processing; terminal or missing jobs are dropped
//! 3. **Rate limit** - Worker waits for a slot in the vendor's window
//! 4. **Dispatch** - `POST {vendor}/process` with the request ID and payload
//! 5. **Settle** - Reconcile, await the webhook, or schedule a retry
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{MemoryJobQueue, MemoryJobStore, RealClock};
//! use courier_dispatch::{DispatchConfig, DispatchEngine, DispatchError};
//!
//! # async fn example() -> Result<(), DispatchError> {
//! let mut engine = DispatchEngine::new(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(MemoryJobQueue::new()),
//!     DispatchConfig::default(),
//!     Arc::new(RealClock::new()),
//! )?;
//!
//! engine.start().await?;
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod housekeeping;
pub mod rate_limit;
pub mod reconcile;
pub mod retry;
pub mod vendor;
mod worker;
mod worker_pool;

pub use client::{ClientConfig, VendorClient, VendorReply};
pub use engine::{DispatchEngine, JobSubmitter};
pub use error::{DispatchError, ErrorCategory, Result};
pub use housekeeping::{RetentionConfig, RetentionSweeper};
pub use rate_limit::{RateLimit, RateLimiter};
pub use reconcile::{Reconciler, Reconciliation, DEFAULT_FAILURE_MESSAGE};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
pub use vendor::{VendorConfig, VendorMode, VendorSelection, VendorSelector};
pub use worker::{default_vendors, DispatchConfig, DispatchWorker, EngineStats};
pub use worker_pool::WorkerPool;

/// Default number of concurrent dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Default queue pop timeout in seconds.
pub const DEFAULT_POP_TIMEOUT_SECONDS: u64 = 5;
