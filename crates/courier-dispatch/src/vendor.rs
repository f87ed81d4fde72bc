//! Vendor configuration and per-attempt vendor selection.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{DispatchError, Result},
    rate_limit::RateLimit,
};

/// How a vendor delivers results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorMode {
    /// Result comes back in the HTTP reply.
    Sync,
    /// Vendor acknowledges and later calls the webhook.
    Async,
}

impl VendorMode {
    /// Request timeout used when none is configured.
    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::Sync => Duration::from_secs(30),
            Self::Async => Duration::from_secs(10),
        }
    }
}

/// One downstream vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Name recorded on the job and used in the webhook path.
    pub name: String,
    /// Base URL; requests go to `{base_url}/process`.
    pub base_url: String,
    /// Sync or async delivery.
    pub mode: VendorMode,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Outbound limit, if any.
    pub rate_limit: Option<RateLimit>,
}

impl VendorConfig {
    /// Creates a vendor with the mode's default timeout and no rate limit.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, mode: VendorMode) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            mode,
            timeout: mode.default_timeout(),
            rate_limit: None,
        }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets an outbound rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// URL that receives dispatch requests.
    pub fn process_url(&self) -> String {
        format!("{}/process", self.base_url.trim_end_matches('/'))
    }
}

/// Strategy for choosing a vendor for each attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorSelection {
    /// Uniformly random vendor per attempt.
    #[default]
    Random,
    /// Reuse the vendor of the previous attempt when it is still configured.
    Sticky,
}

impl std::str::FromStr for VendorSelection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "sticky" => Ok(Self::Sticky),
            other => Err(format!("unknown vendor selection: {other}")),
        }
    }
}

/// Picks vendors for attempts.
#[derive(Debug, Clone)]
pub struct VendorSelector {
    vendors: Vec<VendorConfig>,
    selection: VendorSelection,
}

impl VendorSelector {
    /// Creates a selector over a non-empty vendor list.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `vendors` is empty or names repeat.
    pub fn new(vendors: Vec<VendorConfig>, selection: VendorSelection) -> Result<Self> {
        if vendors.is_empty() {
            return Err(DispatchError::configuration("at least one vendor is required"));
        }
        for (index, vendor) in vendors.iter().enumerate() {
            if vendors[..index].iter().any(|other| other.name == vendor.name) {
                return Err(DispatchError::configuration(format!(
                    "duplicate vendor name: {}",
                    vendor.name
                )));
            }
        }
        Ok(Self { vendors, selection })
    }

    /// Chooses the vendor for the next attempt.
    ///
    /// `previous` is the vendor of the job's last attempt. It only matters
    /// under sticky selection.
    pub fn select(&self, previous: Option<&str>) -> &VendorConfig {
        if self.selection == VendorSelection::Sticky {
            if let Some(vendor) = previous.and_then(|name| self.get(name)) {
                return vendor;
            }
        }
        let index = rand::rng().random_range(0..self.vendors.len());
        &self.vendors[index]
    }

    /// Looks up a vendor by name.
    pub fn get(&self, name: &str) -> Option<&VendorConfig> {
        self.vendors.iter().find(|vendor| vendor.name == name)
    }

    /// All configured vendors.
    pub fn vendors(&self) -> &[VendorConfig] {
        &self.vendors
    }

    /// Active selection strategy.
    pub fn selection(&self) -> VendorSelection {
        self.selection
    }
}
