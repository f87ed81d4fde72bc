//! Courier HTTP API.
//!
//! Vendor webhooks, job status lookup, health probes and the service
//! configuration shared with the binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod handlers;
pub mod server;

pub use config::{Config, ServiceMode};
pub use server::{create_router, create_router_with_timeout, shutdown_signal, start_server, AppState};
