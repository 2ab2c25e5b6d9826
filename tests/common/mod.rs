#![allow(dead_code)]

use tollgate::{BudgetPolicy, IdentityRegistry, InMemorySharedStore, ManualClock, RateLimiter};

pub const SATOSHI: &str = "iot-node-satoshi";
pub const NAKAMOTO: &str = "iot-node-nakamoto";

pub fn policy(rate_per_minute: f64, capacity: f64) -> BudgetPolicy {
    BudgetPolicy::new(rate_per_minute, capacity).expect("valid policy")
}

/// The two provisioned devices from the ingestion deployment.
pub fn iot_registry() -> IdentityRegistry {
    IdentityRegistry::new().with(SATOSHI, policy(100.0, 100.0)).with(NAKAMOTO, policy(200.0, 200.0))
}

/// Limiter backed by `store`, driven by `clock`.
pub async fn distributed(
    registry: IdentityRegistry,
    store: &InMemorySharedStore,
    clock: &ManualClock,
) -> RateLimiter {
    RateLimiter::builder(registry)
        .shared_store(store.clone())
        .clock(clock.clone())
        .build()
        .await
        .expect("limiter builds")
}

/// Limiter with no shared store, driven by `clock`.
pub async fn in_process(registry: IdentityRegistry, clock: &ManualClock) -> RateLimiter {
    RateLimiter::builder(registry).clock(clock.clone()).build().await.expect("limiter builds")
}

/// Count admissions until the first denial, giving up after `limit` calls.
pub async fn drain(limiter: &RateLimiter, identity: &str, limit: usize) -> usize {
    let mut admitted = 0;
    while admitted < limit && limiter.allow(identity).await.is_admitted() {
        admitted += 1;
    }
    admitted
}
