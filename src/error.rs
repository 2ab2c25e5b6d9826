//! Error types for admission control.
use std::time::Duration;

/// Failure talking to the shared coordination store.
///
/// Every variant means "the store could not answer", never "the budget is exhausted".
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The round trip exceeded the configured bound.
    #[error("coordination store timed out after {0:?}")]
    Timeout(Duration),
    /// Connecting or talking to the store failed at the transport level.
    #[error("coordination store connection failed: {0}")]
    Connection(String),
    /// The store rejected or failed to execute the atomic update.
    #[error("coordination store script failed: {0}")]
    Script(String),
    /// The store answered with something we could not interpret.
    #[error("unexpected coordination store reply: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Check if this error is due to the timeout bound.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Invalid budget parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Capacity must be finite and > 0.
    #[error("capacity must be finite and > 0 (got {provided})")]
    InvalidCapacity {
        /// Value provided by caller.
        provided: f64,
    },
    /// Refill rate must be finite and >= 0.
    #[error("refill rate must be finite and >= 0 (got {provided})")]
    InvalidRate {
        /// Value provided by caller.
        provided: f64,
    },
    /// A provisioned identity must not be empty.
    #[error("identity must not be empty")]
    EmptyIdentity,
}

/// Errors produced when validating limiter settings.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The shared-store timeout must be > 0.
    #[error("store_timeout must be > 0 (got {0:?})")]
    InvalidStoreTimeout(Duration),
    /// The recovery interval must be > 0; use `without_recovery` to disable probing.
    #[error("recovery_interval must be > 0 (got {0:?})")]
    InvalidRecoveryInterval(Duration),
}

/// Errors produced while loading limiter configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Malformed JSON.
    #[error("invalid limiter config: {0}")]
    Json(#[from] serde_json::Error),
    /// A policy entry failed validation.
    #[error("invalid policy for `{identity}`: {source}")]
    Policy {
        /// Identity whose policy was rejected.
        identity: String,
        /// Validation failure.
        #[source]
        source: PolicyError,
    },
    /// A policy entry is keyed by the empty string.
    #[error("policy table contains an empty identity")]
    EmptyIdentity,
    /// An environment variable held an unusable value.
    #[error("invalid value for {var}: {reason}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Rejection produced by the admission middleware.
#[derive(thiserror::Error, Debug)]
pub enum AdmissionError<E> {
    /// No identity was attached to the request.
    #[error("unauthenticated: no caller identity attached")]
    Unauthenticated,
    /// The identity is not provisioned for ingestion.
    #[error("identity is not provisioned")]
    Unprovisioned,
    /// The identity's budget is exhausted.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Time until one token is available, if the budget refills at all.
        retry_after: Option<Duration>,
    },
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(#[source] E),
}

impl<E> AdmissionError<E> {
    /// Check if this is an authorization-style rejection (missing or unprovisioned identity).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Unprovisioned)
    }

    /// Check if this is a throughput rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Get the inner error if this is an Inner variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}
