//! Shared coordination store seam.
//!
//! A shared store holds, per identity, a token count and a last-update timestamp, and exposes
//! the refill-then-charge step as one atomic operation executed by the store itself. Two
//! processes charging the same identity concurrently must never both read the same pre-refill
//! state; that guarantee comes from the store (a server-side script, a transaction, a CAS loop
//! run inside the store), never from locks held by the caller.

use crate::bucket::{Charge, TokenBucketState};
use crate::error::StoreError;
use crate::registry::{BudgetPolicy, Identity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Abstract interface to the cross-process bucket store.
///
/// `now` is supplied by the caller and must be used for both the read and the write arm of
/// every operation, so a store never compares timestamps from two different clocks.
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Atomically refill and charge one request for `identity`.
    ///
    /// `Err` means the store could not answer and must never be read as a denial.
    async fn charge_one(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        now: f64,
    ) -> Result<Charge, StoreError>;

    /// Atomically lower the shared bucket to at most `local`'s token count.
    ///
    /// Both sides are refilled to `now` first; an absent shared bucket counts as full. Used to
    /// carry consumption observed while degraded back into the shared store.
    async fn reconcile(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        local: TokenBucketState,
        now: f64,
    ) -> Result<(), StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: SharedStore + ?Sized> SharedStore for Arc<S> {
    async fn charge_one(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        now: f64,
    ) -> Result<Charge, StoreError> {
        (**self).charge_one(identity, policy, now).await
    }

    async fn reconcile(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        local: TokenBucketState,
        now: f64,
    ) -> Result<(), StoreError> {
        (**self).reconcile(identity, policy, local, now).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}

/// Shared store living in this process.
///
/// Several limiters holding clones of one `InMemorySharedStore` behave like several server
/// instances sharing one coordination service. The store can be switched offline to simulate
/// an outage; while offline every operation fails with [`StoreError::Connection`].
#[derive(Default, Clone, Debug)]
pub struct InMemorySharedStore {
    // Map key -> (tokens, last_updated_secs)
    data: Arc<Mutex<HashMap<Identity, TokenBucketState>>>,
    offline: Arc<AtomicBool>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (`true`) or recovering (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current state for `identity`, if present.
    pub fn snapshot(&self, identity: &str) -> Option<TokenBucketState> {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).get(identity).copied()
    }

    /// Drop the state for `identity`, as a store evicting the key would.
    pub fn evict(&self, identity: &str) {
        self.data.lock().unwrap_or_else(|p| p.into_inner()).remove(identity);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn charge_one(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        now: f64,
    ) -> Result<Charge, StoreError> {
        self.check_online()?;
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let prior = guard.get(identity.as_str()).copied();
        let (state, charge) = TokenBucketState::charge_or_init(prior, policy, now);
        guard.insert(identity.clone(), state);
        Ok(charge)
    }

    async fn reconcile(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        mut local: TokenBucketState,
        now: f64,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut guard = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let mut shared =
            guard.get(identity.as_str()).copied().unwrap_or_else(|| TokenBucketState::full(policy, now));
        shared.refill(policy, now);
        local.refill(policy, now);
        shared.tokens = shared.tokens.min(local.tokens);
        guard.insert(identity.clone(), shared);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}
