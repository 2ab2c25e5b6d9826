//! In-process bucket store used while the limiter is degraded.

use crate::bucket::{Charge, TokenBucketState};
use crate::registry::{BudgetPolicy, Identity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Concurrency-safe map from identity to bucket state.
///
/// One coarse lock guards the whole map; the critical section is O(1) and never awaits.
/// Clones share the same underlying map.
#[derive(Default, Clone, Debug)]
pub struct LocalBucketStore {
    buckets: Arc<Mutex<HashMap<Identity, TokenBucketState>>>,
}

impl LocalBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation is one insert of a fully computed state; a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, TokenBucketState>> {
        self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refill and charge one request for `identity`.
    pub fn charge_one(&self, identity: &Identity, policy: &BudgetPolicy, now: f64) -> Charge {
        let mut guard = self.lock();
        let prior = guard.get(identity.as_str()).copied();
        let (state, charge) = TokenBucketState::charge_or_init(prior, policy, now);
        guard.insert(identity.clone(), state);
        charge
    }

    /// Current state for `identity`, if it has been seen.
    pub fn snapshot(&self, identity: &str) -> Option<TokenBucketState> {
        self.lock().get(identity).copied()
    }

    /// Copy every bucket, for reconciliation into the shared store.
    pub fn snapshot_all(&self) -> Vec<(Identity, TokenBucketState)> {
        self.lock().iter().map(|(id, state)| (id.clone(), *state)).collect()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no identity has been charged yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(rate: f64, cap: f64) -> BudgetPolicy {
        BudgetPolicy::new(rate, cap).unwrap()
    }

    #[test]
    fn creates_state_lazily() {
        let store = LocalBucketStore::new();
        let id = Identity::new("sensor-1");
        assert!(store.snapshot("sensor-1").is_none());
        assert!(store.charge_one(&id, &policy(60.0, 3.0), 10.0).is_admitted());
        assert_eq!(
            store.snapshot("sensor-1"),
            Some(TokenBucketState { tokens: 2.0, last_updated: 10.0 })
        );
    }

    #[test]
    fn exhausts_after_capacity() {
        let store = LocalBucketStore::new();
        let id = Identity::new("sensor-1");
        let p = policy(60.0, 3.0);
        for _ in 0..3 {
            assert!(store.charge_one(&id, &p, 0.0).is_admitted());
        }
        assert!(!store.charge_one(&id, &p, 0.0).is_admitted());
    }

    #[test]
    fn identities_are_independent() {
        let store = LocalBucketStore::new();
        let p = policy(0.0, 1.0);
        let a = Identity::new("a");
        let b = Identity::new("b");
        assert!(store.charge_one(&a, &p, 0.0).is_admitted());
        assert!(!store.charge_one(&a, &p, 0.0).is_admitted());
        assert!(store.charge_one(&b, &p, 0.0).is_admitted());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_resets_to_full() {
        let store = LocalBucketStore::new();
        let id = Identity::new("a");
        let p = policy(0.0, 1.0);
        assert!(store.charge_one(&id, &p, 0.0).is_admitted());
        store.clear();
        assert!(store.is_empty());
        assert!(store.charge_one(&id, &p, 0.0).is_admitted());
    }

    #[test]
    fn concurrent_threads_never_overadmit() {
        let store = LocalBucketStore::new();
        let id = Identity::new("hot");
        let p = policy(0.0, 64.0);
        let admitted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..32 {
                        if store.charge_one(&id, &p, 0.0).is_admitted() {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 64);
    }
}
