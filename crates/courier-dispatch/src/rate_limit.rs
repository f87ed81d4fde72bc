//! Per-vendor sliding-window rate limiting.
//!
//! Each vendor keeps a deque of admission instants. An admission is granted
//! while fewer than `limit` instants fall inside the trailing window, so no
//! window of that length ever holds more than `limit` admissions. Time comes
//! from the injected [`Clock`], which lets tests step through windows without
//! sleeping.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use courier_core::Clock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Maximum admissions per trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Admissions allowed per window.
    pub limit: u32,
    /// Length of the sliding window.
    pub window: Duration,
}

impl RateLimit {
    /// Creates a limit of `limit` admissions per `window`.
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Limit of `limit` admissions per minute.
    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Sliding-window limiter shared by all workers of an engine.
#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<String, RateLimit>,
    admissions: Mutex<HashMap<String, VecDeque<Instant>>>,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter with no configured vendors.
    ///
    /// `poll_interval` is how long `acquire` waits between admission attempts.
    pub fn new(poll_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { limits: HashMap::new(), admissions: Mutex::new(HashMap::new()), poll_interval, clock }
    }

    /// Registers a limit for a vendor.
    #[must_use]
    pub fn with_limit(mut self, vendor: impl Into<String>, limit: RateLimit) -> Self {
        self.limits.insert(vendor.into(), limit);
        self
    }

    /// Limit configured for a vendor.
    pub fn limit_for(&self, vendor: &str) -> Option<RateLimit> {
        self.limits.get(vendor).copied()
    }

    /// Admits one request if the vendor's window has room.
    ///
    /// Vendors without a configured limit are always admitted.
    pub async fn try_acquire(&self, vendor: &str) -> bool {
        let Some(limit) = self.limits.get(vendor) else {
            return true;
        };

        let now = self.clock.now();
        let mut admissions = self.admissions.lock().await;
        let window = admissions.entry(vendor.to_string()).or_default();

        while window.front().is_some_and(|admitted| now.duration_since(*admitted) >= limit.window)
        {
            window.pop_front();
        }

        if window.len() < limit.limit as usize {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    /// Waits until the vendor admits a request.
    ///
    /// Polls at the configured interval. There is no deadline, so a request
    /// only waits as long as the window takes to drain.
    pub async fn acquire(&self, vendor: &str) {
        let mut waits = 0u32;
        while !self.try_acquire(vendor).await {
            if waits == 0 {
                debug!(vendor, "rate limit reached, waiting for a slot");
            }
            waits = waits.saturating_add(1);
            self.clock.sleep(self.poll_interval).await;
        }
    }

    /// Number of admissions inside the vendor's current window.
    pub async fn in_window(&self, vendor: &str) -> usize {
        let Some(limit) = self.limits.get(vendor) else {
            return 0;
        };
        let now = self.clock.now();
        self.admissions.lock().await.get(vendor).map_or(0, |window| {
            window.iter().filter(|admitted| now.duration_since(**admitted) < limit.window).count()
        })
    }
}
