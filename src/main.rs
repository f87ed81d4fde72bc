//! Courier vendor dispatch service.
//!
//! Main entry point. Initializes all subsystems according to the service
//! mode and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_core::{
    Clock, JobQueue, JobStore, PostgresJobStore, RealClock, RedisJobQueue, Sanitizer,
};
use courier_dispatch::DispatchEngine;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    init_tracing(&config.rust_log);

    info!(
        database_url = %config.database_url_masked(),
        redis_url = %config.redis_url_masked(),
        queue = %config.queue_name,
        mode = ?config.service_mode,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let store = PostgresJobStore::new(db_pool.clone());
    store.migrate().await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let queue = RedisJobQueue::connect(&config.redis_url, config.queue_name.clone())
        .await
        .context("Failed to connect to Redis")?;
    info!(queue = %queue.queue_name(), "Queue connection established");

    let store: Arc<dyn JobStore> = Arc::new(store);
    let queue: Arc<dyn JobQueue> = Arc::new(queue);
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());

    let engine = if config.service_mode.runs_workers() {
        let mut engine = DispatchEngine::new(
            store.clone(),
            queue.clone(),
            config.to_dispatch_config(),
            clock.clone(),
        )
        .context("Invalid dispatch configuration")?;
        engine.start().await.context("Failed to start dispatch engine")?;
        Some(engine)
    } else {
        None
    };

    let server_result = if config.service_mode.runs_api() {
        let state = AppState::new(
            store.clone(),
            queue.clone(),
            Sanitizer::new(config.sensitive_field_list()),
            clock.clone(),
        );
        let addr = config.parse_server_addr()?;
        info!(addr = %addr, "Courier is ready to receive vendor webhooks");

        courier_api::start_server(
            state,
            addr,
            Duration::from_secs(config.request_timeout),
            courier_api::shutdown_signal(),
        )
        .await
    } else {
        info!("Running dispatch workers only");
        courier_api::shutdown_signal().await;
        Ok(())
    };

    if let Err(ref e) = server_result {
        error!(error = %e, "Server failed");
    }

    let mut workers_stopped = true;
    if let Some(engine) = engine {
        let stats_handle = engine.stats_handle();
        if let Err(e) = engine.shutdown().await {
            error!(error = %e, "Dispatch engine did not stop cleanly");
            workers_stopped = false;
        }
        let stats = stats_handle.read().await;
        info!(
            processed = stats.messages_processed,
            sync_completions = stats.sync_completions,
            async_acceptances = stats.async_acceptances,
            retries_exhausted = stats.retries_exhausted,
            "Dispatch engine stopped"
        );
    }

    if workers_stopped {
        db_pool.close().await;
        info!("Database connections closed");
    } else {
        warn!("Workers still running, leaving database pool open until exit");
    }

    server_result.context("http server failed")?;

    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` over the configured filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
