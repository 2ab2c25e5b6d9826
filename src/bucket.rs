//! Continuous token-bucket arithmetic shared by every store.
//!
//! Refill is proportional to elapsed wall-clock time and capped at capacity; a request costs
//! exactly one token. Fractional tokens are carried between calls so identities with a rate
//! below one per second still accumulate.

use crate::registry::BudgetPolicy;
use std::time::Duration;

/// Outcome of charging one request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Charge {
    /// A token was consumed.
    Admitted {
        /// Tokens left after the charge.
        remaining: f64,
    },
    /// Fewer than one token was available; nothing was consumed.
    Denied {
        /// Tokens available (after refill) at the time of the check.
        available: f64,
    },
}

impl Charge {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Charge::Admitted { .. })
    }

    /// Token count left in the bucket after this charge.
    pub fn tokens(&self) -> f64 {
        match *self {
            Charge::Admitted { remaining } => remaining,
            Charge::Denied { available } => available,
        }
    }
}

/// Admission budget for one identity in one store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    /// Current tokens, `0 <= tokens <= capacity` at rest.
    pub tokens: f64,
    /// Seconds timestamp of the last refill.
    pub last_updated: f64,
}

impl TokenBucketState {
    /// State for an identity seen for the first time, before charging.
    pub fn full(policy: &BudgetPolicy, now: f64) -> Self {
        Self { tokens: policy.capacity(), last_updated: now }
    }

    /// Add tokens for the time elapsed since `last_updated`, capped at capacity.
    ///
    /// Negative elapsed time (a wall clock stepping backwards) counts as zero.
    pub fn refill(&mut self, policy: &BudgetPolicy, now: f64) {
        let elapsed = (now - self.last_updated).max(0.0);
        self.tokens = (self.tokens + elapsed * policy.rate_per_second()).min(policy.capacity());
        self.last_updated = now;
    }

    /// Refill, then take one token if at least one is available.
    pub fn charge(&mut self, policy: &BudgetPolicy, now: f64) -> Charge {
        self.refill(policy, now);
        if self.tokens < 1.0 {
            return Charge::Denied { available: self.tokens };
        }
        self.tokens -= 1.0;
        Charge::Admitted { remaining: self.tokens }
    }

    /// Charge against an optional prior state, creating a full bucket when absent.
    pub fn charge_or_init(
        state: Option<Self>,
        policy: &BudgetPolicy,
        now: f64,
    ) -> (Self, Charge) {
        let mut state = state.unwrap_or_else(|| Self::full(policy, now));
        let charge = state.charge(policy, now);
        (state, charge)
    }
}

/// How long until a bucket holding `available` tokens can admit one request.
///
/// `None` when the policy never refills, or refills so slowly the wait does not fit a
/// [`Duration`].
pub fn retry_after(policy: &BudgetPolicy, available: f64) -> Option<Duration> {
    let rate = policy.rate_per_second();
    if rate <= 0.0 {
        return None;
    }
    let missing = (1.0 - available).max(0.0);
    Duration::try_from_secs_f64(missing / rate).ok()
}
