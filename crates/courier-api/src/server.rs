//! HTTP server configuration and request routing.
//!
//! Provides Axum server setup with the middleware stack and graceful
//! shutdown. Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement (30s default)
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! [`start_server`] stops accepting connections once its shutdown future
//! resolves and waits for in-flight requests before returning. The binary
//! passes [`shutdown_signal`] so CTRL+C and SIGTERM both trigger it.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use courier_core::{Clock, JobQueue, JobStore, Sanitizer};
use courier_dispatch::Reconciler;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers;

/// Request timeout applied by [`create_router`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Job records
    pub store: Arc<dyn JobStore>,
    /// Dispatch queue, checked by the health endpoint
    pub queue: Arc<dyn JobQueue>,
    /// Applies webhook outcomes
    pub reconciler: Reconciler,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Builds the state with a reconciler writing through `store`.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        sanitizer: Sanitizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), sanitizer, clock.clone());
        Self { store, queue, reconciler, clock }
    }
}

/// Creates the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use courier_api::{create_router, AppState};
/// use courier_core::{MemoryJobQueue, MemoryJobStore, RealClock, Sanitizer};
///
/// let state = AppState::new(
///     Arc::new(MemoryJobStore::new()),
///     Arc::new(MemoryJobQueue::new()),
///     Sanitizer::default(),
///     Arc::new(RealClock::new()),
/// );
/// let app = create_router(state);
/// ```
pub fn create_router(state: AppState) -> Router {
    create_router_with_timeout(state, DEFAULT_REQUEST_TIMEOUT)
}

/// Creates the router with an explicit request timeout.
pub fn create_router_with_timeout(state: AppState, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/live", get(handlers::liveness_check));

    let api_routes = Router::new()
        .route("/vendor-webhook/{vendor}", post(handlers::vendor_webhook))
        .route("/jobs/{request_id}", get(handlers::get_job));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Longest client-supplied request ID that is echoed back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Middleware to propagate a request ID into all responses.
///
/// Reuses the client's `X-Request-Id` when it is non-empty printable ASCII of
/// at most [`MAX_REQUEST_ID_LEN`] bytes, otherwise generates one.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = client_request_id(&req).unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

fn client_request_id(req: &Request) -> Option<String> {
    let value = req.headers().get("x-request-id")?.to_str().ok()?.trim();
    let acceptable = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic());
    acceptable.then(|| value.to_string())
}

/// Serves the router on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the server
/// fails while serving.
pub async fn start_server<F>(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router_with_timeout(state, request_timeout);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests and workers to complete");
}
