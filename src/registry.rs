//! Identity registry: who may ingest, and at what budget.

use crate::error::PolicyError;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Opaque caller key an admission decision is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Arc<str>);

impl Identity {
    /// Create an identity from any string-like value.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Budget parameters for one identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetPolicy {
    rate_per_minute: f64,
    capacity: f64,
}

impl BudgetPolicy {
    /// Create a validated policy.
    ///
    /// `rate_per_minute` may be zero (burst-only budget); `capacity` must be positive.
    /// There is no ordering requirement between the two.
    pub fn new(rate_per_minute: f64, capacity: f64) -> Result<Self, PolicyError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(PolicyError::InvalidCapacity { provided: capacity });
        }
        if !rate_per_minute.is_finite() || rate_per_minute < 0.0 {
            return Err(PolicyError::InvalidRate { provided: rate_per_minute });
        }
        Ok(Self { rate_per_minute, capacity })
    }

    /// Tokens replenished per minute.
    pub fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute
    }

    /// Tokens replenished per second.
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_minute / 60.0
    }

    /// Maximum burst.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Read-only mapping from identity to budget.
///
/// Safe for unsynchronized concurrent reads; the limiter swaps whole registries rather than
/// mutating one.
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    policies: HashMap<Identity, BudgetPolicy>,
}

impl IdentityRegistry {
    /// Empty registry; every lookup misses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-validated policies.
    pub fn from_policies<I, K>(policies: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (K, BudgetPolicy)>,
        K: Into<Identity>,
    {
        let mut map = HashMap::new();
        for (id, policy) in policies {
            let id = id.into();
            if id.as_str().is_empty() {
                return Err(PolicyError::EmptyIdentity);
            }
            map.insert(id, policy);
        }
        Ok(Self { policies: map })
    }

    /// Builder-style insert.
    pub fn with(mut self, identity: impl Into<Identity>, policy: BudgetPolicy) -> Self {
        self.policies.insert(identity.into(), policy);
        self
    }

    /// Budget for `identity`, or `None` if it is not provisioned.
    pub fn lookup(&self, identity: &str) -> Option<BudgetPolicy> {
        self.policies.get(identity).copied()
    }

    /// Budget for `identity` together with the registry's shared key.
    pub fn resolve(&self, identity: &str) -> Option<(Identity, BudgetPolicy)> {
        self.policies.get_key_value(identity).map(|(id, policy)| (id.clone(), *policy))
    }

    /// Number of provisioned identities.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// True when nothing is provisioned.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
