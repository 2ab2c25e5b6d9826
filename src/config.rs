//! Limiter configuration.
//!
//! Configuration is data handed in from outside: a JSON document, or a handful of
//! environment variables. The limiter itself never reads either.
//!
//! ```json
//! {
//!   "store_url": "redis://127.0.0.1:6379",
//!   "store_timeout_ms": 200,
//!   "recovery_interval_secs": 30,
//!   "key_prefix": "rl:",
//!   "policies": {
//!     "iot-node-satoshi":  { "rate_per_minute": 100, "capacity": 100 },
//!     "iot-node-nakamoto": { "rate_per_minute": 200, "capacity": 200 }
//!   }
//! }
//! ```

use crate::error::ConfigError;
use crate::limiter::{RateLimiter, RateLimiterBuilder};
use crate::registry::{BudgetPolicy, IdentityRegistry};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Store endpoint variable.
pub const ENV_STORE_URL: &str = "TOLLGATE_STORE_URL";
/// Fallback store endpoint variable.
pub const ENV_REDIS_URL: &str = "REDIS_URL";
/// Store timeout in milliseconds.
pub const ENV_STORE_TIMEOUT_MS: &str = "TOLLGATE_STORE_TIMEOUT_MS";
/// Policy table as JSON (`{"identity": {"rate_per_minute": .., "capacity": ..}}`).
pub const ENV_POLICIES: &str = "TOLLGATE_POLICIES";

fn default_timeout_ms() -> u64 {
    200
}

fn default_recovery_secs() -> u64 {
    30
}

fn default_prefix() -> String {
    "rl:".to_string()
}

/// Everything needed to stand up a limiter.
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Coordination store endpoint. Absent (or empty) means in-process limiting only.
    #[serde(default)]
    pub store_url: Option<String>,
    /// Bound on each store round trip.
    #[serde(default = "default_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Seconds between recovery probes while degraded; `0` disables probing.
    #[serde(default = "default_recovery_secs")]
    pub recovery_interval_secs: u64,
    /// Prefix for store keys.
    #[serde(default = "default_prefix")]
    pub key_prefix: String,
    /// Identity -> budget.
    #[serde(default)]
    pub policies: HashMap<String, RawBudget>,
}

/// Unvalidated budget entry as it appears in configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawBudget {
    /// Tokens per minute.
    pub rate_per_minute: f64,
    /// Burst capacity.
    pub capacity: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            store_timeout_ms: default_timeout_ms(),
            recovery_interval_secs: default_recovery_secs(),
            key_prefix: default_prefix(),
            policies: HashMap::new(),
        }
    }
}

impl LimiterConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut cfg: Self = serde_json::from_str(json)?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self {
            store_url: lookup(ENV_STORE_URL).or_else(|| lookup(ENV_REDIS_URL)),
            ..Self::default()
        };
        if let Some(raw) = lookup(ENV_STORE_TIMEOUT_MS) {
            cfg.store_timeout_ms = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Env { var: ENV_STORE_TIMEOUT_MS, reason: e.to_string() }
            })?;
        }
        if let Some(raw) = lookup(ENV_POLICIES) {
            cfg.policies = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::Env { var: ENV_POLICIES, reason: e.to_string() })?;
        }
        cfg.normalize();
        Ok(cfg)
    }

    fn normalize(&mut self) {
        if self.store_url.as_deref().map(str::trim).is_some_and(str::is_empty) {
            self.store_url = None;
        }
    }

    /// Validate every policy and build the registry.
    pub fn registry(&self) -> Result<IdentityRegistry, ConfigError> {
        let mut entries = Vec::with_capacity(self.policies.len());
        for (identity, raw) in &self.policies {
            if identity.is_empty() {
                return Err(ConfigError::EmptyIdentity);
            }
            let policy = BudgetPolicy::new(raw.rate_per_minute, raw.capacity)
                .map_err(|source| ConfigError::Policy { identity: identity.clone(), source })?;
            entries.push((identity.as_str(), policy));
        }
        IdentityRegistry::from_policies(entries).map_err(|_| ConfigError::EmptyIdentity)
    }

    /// Store timeout as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// A limiter builder carrying this configuration's registry, timeout and recovery
    /// settings. The caller attaches the shared store, if any.
    pub fn builder(&self) -> Result<RateLimiterBuilder, ConfigError> {
        let builder = RateLimiter::builder(self.registry()?).store_timeout(self.store_timeout());
        Ok(match self.recovery_interval_secs {
            0 => builder.without_recovery(),
            secs => builder.recovery_interval(Duration::from_secs(secs)),
        })
    }
}
