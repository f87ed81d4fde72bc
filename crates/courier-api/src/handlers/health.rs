//! Health check handlers for service monitoring.
//!
//! Provides liveness and health endpoints with store and queue connectivity
//! checks for orchestration systems like Kubernetes.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use courier_core::{Clock, JobQueue, JobStore};
use serde::Serialize;
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Critical systems failing
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Job store connectivity
    pub database: ComponentHealth,
    /// Queue connectivity
    pub queue: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Optional error message if unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is experiencing issues
    Down,
}

/// Health service that encapsulates the clock for testable health checks.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Checks the store and the queue.
    pub async fn health_check(&self, store: &dyn JobStore, queue: &dyn JobQueue) -> HealthResponse {
        debug!("Performing health check");

        let timestamp = self.clock.now_utc();
        let database = self.check("Database", store.health_check()).await;
        let queue = self.check("Queue", queue.health_check()).await;

        let status = if database.status == ComponentStatus::Up && queue.status == ComponentStatus::Up
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        HealthResponse {
            status,
            timestamp,
            checks: HealthChecks { database, queue },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn check(
        &self,
        component: &str,
        probe: impl Future<Output = courier_core::Result<()>>,
    ) -> ComponentHealth {
        let start_time = self.clock.now();
        let result = probe.await;
        let response_time_ms = millis(self.clock.now().saturating_duration_since(start_time));

        match result {
            Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms },
            Err(e) => {
                error!("{} health check failed: {}", component, e);
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("{component} connection failed: {e}")),
                    response_time_ms,
                }
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Health check endpoint handler.
///
/// Returns 503 when either dependency is down.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let health_service = HealthService::new(app_state.clock.clone());
    let response =
        health_service.health_check(app_state.store.as_ref(), app_state.queue.as_ref()).await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(
        status = ?response.status,
        db_status = ?response.checks.database.status,
        queue_status = ?response.checks.queue.status,
        "Health check completed"
    );

    (status_code, Json(response)).into_response()
}

/// Liveness check endpoint for Kubernetes probes.
///
/// Does not touch external dependencies.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": app_state.clock.now_utc(),
        "service": "courier"
    });

    (StatusCode::OK, Json(response)).into_response()
}
