//! Core job model and infrastructure adapters.
//!
//! Provides the job record and its lifecycle rules, the storage and queue
//! abstractions with PostgreSQL, Redis and in-memory implementations, the
//! clock abstraction and the vendor result sanitizer. The dispatch engine and
//! the HTTP API both build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod queue;
pub mod sanitize;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{Job, JobStatus, Outcome, QueueMessage, RequestId, Resolution};
pub use queue::{JobQueue, Lease, MemoryJobQueue, RedisJobQueue};
pub use sanitize::Sanitizer;
pub use storage::{JobStore, MemoryJobStore, PostgresJobStore, UpdateOutcome};
pub use time::{Clock, RealClock, TestClock};
