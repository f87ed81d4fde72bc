//! Configuration management for the Courier dispatch service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use courier_dispatch::{
    ClientConfig, DispatchConfig, RateLimit, RetentionConfig, RetryPolicy, VendorConfig,
    VendorMode, VendorSelection,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "courier.toml";

/// Which parts of the service this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// Dispatch workers and the HTTP server.
    #[default]
    All,
    /// Dispatch workers only.
    Worker,
    /// HTTP server only.
    Api,
}

impl ServiceMode {
    /// Returns true if this process runs dispatch workers.
    pub const fn runs_workers(self) -> bool {
        matches!(self, Self::All | Self::Worker)
    }

    /// Returns true if this process serves HTTP.
    pub const fn runs_api(self) -> bool {
        matches!(self, Self::All | Self::Api)
    }
}

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The defaults point at local PostgreSQL, Redis and the two mock vendors,
/// so a development setup needs no configuration at all.
///
/// # Example
///
/// ```no_run
/// use courier_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    ///
    /// Environment variable: `DATABASE_URL`
    #[serde(default = "default_database_url", alias = "DATABASE_URL")]
    pub database_url: String,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections", alias = "DATABASE_MAX_CONNECTIONS")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections", alias = "DATABASE_MIN_CONNECTIONS")]
    pub database_min_connections: u32,

    // Queue
    /// Redis connection URL.
    ///
    /// Environment variable: `REDIS_URL`
    #[serde(default = "default_redis_url", alias = "REDIS_URL")]
    pub redis_url: String,
    /// Name of the Redis list holding pending messages.
    ///
    /// Environment variable: `QUEUE_NAME`
    #[serde(default = "default_queue_name", alias = "QUEUE_NAME")]
    pub queue_name: String,

    // Server
    /// Server bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,
    /// Server bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,
    /// HTTP request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,
    /// Components run by this process.
    ///
    /// Environment variable: `SERVICE_MODE`
    #[serde(default, alias = "SERVICE_MODE")]
    pub service_mode: ServiceMode,

    // Dispatch
    /// Number of concurrent dispatch workers.
    ///
    /// Environment variable: `WORKER_COUNT`
    #[serde(default = "default_worker_count", alias = "WORKER_COUNT")]
    pub worker_count: usize,
    /// Seconds one queue pop waits before checking for shutdown.
    ///
    /// Environment variable: `POP_TIMEOUT_SECONDS`
    #[serde(default = "default_pop_timeout", alias = "POP_TIMEOUT_SECONDS")]
    pub pop_timeout_seconds: u64,
    /// Seconds to wait for workers during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout", alias = "SHUTDOWN_TIMEOUT_SECONDS")]
    pub shutdown_timeout_seconds: u64,

    // Retry
    /// Dispatch failures allowed before a job fails.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[serde(default = "default_max_retries", alias = "MAX_RETRIES")]
    pub max_retries: u32,
    /// Base delay for linear backoff in milliseconds.
    ///
    /// Environment variable: `RETRY_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms", alias = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    // Vendors
    /// Vendor selection strategy, `random` or `sticky`.
    ///
    /// Environment variable: `VENDOR_SELECTION`
    #[serde(default, alias = "VENDOR_SELECTION")]
    pub vendor_selection: VendorSelection,
    /// Base URL of the synchronous vendor.
    ///
    /// Environment variable: `MOCK_VENDOR_SYNC_URL`
    #[serde(default = "default_sync_vendor_url", alias = "MOCK_VENDOR_SYNC_URL")]
    pub mock_vendor_sync_url: String,
    /// Base URL of the asynchronous vendor.
    ///
    /// Environment variable: `MOCK_VENDOR_ASYNC_URL`
    #[serde(default = "default_async_vendor_url", alias = "MOCK_VENDOR_ASYNC_URL")]
    pub mock_vendor_async_url: String,
    /// Request timeout for the synchronous vendor in seconds.
    ///
    /// Environment variable: `SYNC_VENDOR_TIMEOUT_SECONDS`
    #[serde(default = "default_sync_timeout", alias = "SYNC_VENDOR_TIMEOUT_SECONDS")]
    pub sync_vendor_timeout_seconds: u64,
    /// Request timeout for the asynchronous vendor in seconds.
    ///
    /// Environment variable: `ASYNC_VENDOR_TIMEOUT_SECONDS`
    #[serde(default = "default_async_timeout", alias = "ASYNC_VENDOR_TIMEOUT_SECONDS")]
    pub async_vendor_timeout_seconds: u64,

    // Rate limiting
    /// Dispatches per window for the synchronous vendor.
    ///
    /// Environment variable: `SYNC_VENDOR_RATE_LIMIT`
    #[serde(default = "default_sync_rate_limit", alias = "SYNC_VENDOR_RATE_LIMIT")]
    pub sync_vendor_rate_limit: u32,
    /// Dispatches per window for the asynchronous vendor.
    ///
    /// Environment variable: `ASYNC_VENDOR_RATE_LIMIT`
    #[serde(default = "default_async_rate_limit", alias = "ASYNC_VENDOR_RATE_LIMIT")]
    pub async_vendor_rate_limit: u32,
    /// Length of the sliding rate-limit window in seconds.
    ///
    /// Environment variable: `RATE_LIMIT_WINDOW_SECONDS`
    #[serde(default = "default_rate_limit_window", alias = "RATE_LIMIT_WINDOW_SECONDS")]
    pub rate_limit_window_seconds: u64,
    /// How often a worker re-checks a full window in milliseconds.
    ///
    /// Environment variable: `RATE_LIMIT_POLL_INTERVAL_MS`
    #[serde(default = "default_poll_interval_ms", alias = "RATE_LIMIT_POLL_INTERVAL_MS")]
    pub rate_limit_poll_interval_ms: u64,

    // Results
    /// Comma-separated field names stripped from vendor results.
    ///
    /// Environment variable: `SENSITIVE_FIELDS`
    #[serde(default = "default_sensitive_fields", alias = "SENSITIVE_FIELDS")]
    pub sensitive_fields: String,
    /// Days terminal jobs are kept; 0 disables the purge.
    ///
    /// Environment variable: `JOB_RETENTION_DAYS`
    #[serde(default = "default_retention_days", alias = "JOB_RETENTION_DAYS")]
    pub job_retention_days: u64,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Fails if a source cannot be parsed or validation rejects a value.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the dispatch crate's configuration types.
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            worker_count: self.worker_count,
            pop_timeout: Duration::from_secs(self.pop_timeout_seconds),
            rate_limit_poll_interval: Duration::from_millis(self.rate_limit_poll_interval_ms),
            retry_policy: self.to_retry_policy(),
            vendors: self.to_vendors(),
            vendor_selection: self.vendor_selection,
            client_config: ClientConfig::default(),
            sensitive_fields: self.sensitive_field_list(),
            retention: self.to_retention_config(),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_seconds),
            ..DispatchConfig::default()
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// The synchronous and asynchronous vendors with their limits.
    pub fn to_vendors(&self) -> Vec<VendorConfig> {
        let window = Duration::from_secs(self.rate_limit_window_seconds);
        vec![
            VendorConfig::new("sync", &self.mock_vendor_sync_url, VendorMode::Sync)
                .with_timeout(Duration::from_secs(self.sync_vendor_timeout_seconds))
                .with_rate_limit(RateLimit::new(self.sync_vendor_rate_limit, window)),
            VendorConfig::new("async", &self.mock_vendor_async_url, VendorMode::Async)
                .with_timeout(Duration::from_secs(self.async_vendor_timeout_seconds))
                .with_rate_limit(RateLimit::new(self.async_vendor_rate_limit, window)),
        ]
    }

    /// Retention purge settings, or `None` when disabled.
    pub fn to_retention_config(&self) -> Option<RetentionConfig> {
        (self.job_retention_days > 0).then(|| RetentionConfig {
            retention: Duration::from_secs(self.job_retention_days.saturating_mul(24 * 60 * 60)),
            ..RetentionConfig::default()
        })
    }

    /// Sensitive field names, trimmed, without empty entries.
    pub fn sensitive_field_list(&self) -> Vec<String> {
        self.sensitive_fields
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Parse server socket address from host and port configuration.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("Invalid server address")
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        mask_password(&self.database_url)
    }

    /// Get Redis URL with password masked for logging.
    pub fn redis_url_masked(&self) -> String {
        mask_password(&self.redis_url)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.queue_name.is_empty() {
            anyhow::bail!("queue_name must not be empty");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.pop_timeout_seconds == 0 {
            anyhow::bail!("pop_timeout_seconds must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("max_retries must be greater than 0");
        }

        if self.mock_vendor_sync_url.is_empty() || self.mock_vendor_async_url.is_empty() {
            anyhow::bail!("vendor URLs must not be empty");
        }

        if self.sync_vendor_rate_limit == 0 || self.async_vendor_rate_limit == 0 {
            anyhow::bail!("vendor rate limits must be greater than 0");
        }

        if self.rate_limit_window_seconds == 0 {
            anyhow::bail!("rate_limit_window_seconds must be greater than 0");
        }

        if self.rate_limit_poll_interval_ms == 0 {
            anyhow::bail!("rate_limit_poll_interval_ms must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            redis_url: default_redis_url(),
            queue_name: default_queue_name(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            service_mode: ServiceMode::default(),
            worker_count: default_worker_count(),
            pop_timeout_seconds: default_pop_timeout(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_base_delay_ms(),
            vendor_selection: VendorSelection::default(),
            mock_vendor_sync_url: default_sync_vendor_url(),
            mock_vendor_async_url: default_async_vendor_url(),
            sync_vendor_timeout_seconds: default_sync_timeout(),
            async_vendor_timeout_seconds: default_async_timeout(),
            sync_vendor_rate_limit: default_sync_rate_limit(),
            async_vendor_rate_limit: default_async_rate_limit(),
            rate_limit_window_seconds: default_rate_limit_window(),
            rate_limit_poll_interval_ms: default_poll_interval_ms(),
            sensitive_fields: default_sensitive_fields(),
            job_retention_days: default_retention_days(),
            rust_log: default_log_level(),
        }
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // scheme separator, no credentials
            if !url[colon_pos + 1..at_pos].starts_with("//") {
                let mut masked = url.to_string();
                masked.replace_range(colon_pos + 1..at_pos, "***");
                return masked;
            }
        }
    }
    url.to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost/courier".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_queue_name() -> String {
    "job_queue".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_worker_count() -> usize {
    courier_dispatch::DEFAULT_WORKER_COUNT
}

fn default_pop_timeout() -> u64 {
    courier_dispatch::DEFAULT_POP_TIMEOUT_SECONDS
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_sync_vendor_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_async_vendor_url() -> String {
    "http://localhost:3002".to_string()
}

fn default_sync_timeout() -> u64 {
    VendorMode::Sync.default_timeout().as_secs()
}

fn default_async_timeout() -> u64 {
    VendorMode::Async.default_timeout().as_secs()
}

fn default_sync_rate_limit() -> u32 {
    30
}

fn default_async_rate_limit() -> u32 {
    20
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_sensitive_fields() -> String {
    courier_core::sanitize::DEFAULT_SENSITIVE_FIELDS.join(",")
}

fn default_retention_days() -> u64 {
    30
}

fn default_log_level() -> String {
    "info,courier=debug,tower_http=debug".to_string()
}
