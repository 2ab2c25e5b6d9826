//! Admission limiter with distributed and degraded modes.
//!
//! The limiter is a two-state machine:
//!
//! - **Distributed**: every check is charged against the [`SharedStore`]. A store failure flips
//!   the limiter to Degraded and the failing check is answered from local state.
//! - **Degraded**: every check is charged against the in-process [`LocalBucketStore`]. When a
//!   recovery interval is configured, one check per interval probes the shared store; on success
//!   local buckets are merged into the shared store and the limiter returns to Distributed.
//!
//! Store failures never reach the caller: a check always resolves to admitted or denied.

use crate::bucket::{retry_after, Charge};
use crate::clock::{Clock, SystemClock};
use crate::error::{BuildError, StoreError};
use crate::local::LocalBucketStore;
use crate::registry::{BudgetPolicy, Identity, IdentityRegistry};
use crate::shared::SharedStore;
use crate::telemetry::{LimiterEvent, NullSink, TelemetrySink};
use arc_swap::ArcSwap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on one shared-store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(200);
/// Default wait between recovery probes while degraded.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(30);

const MODE_DISTRIBUTED: u8 = 0;
const MODE_DEGRADED: u8 = 1;

/// Which store backs admission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Checks are charged against the shared coordination store.
    Distributed,
    /// Checks are charged against process-local buckets only.
    Degraded,
}

impl Mode {
    fn to_u8(self) -> u8 {
        match self {
            Mode::Distributed => MODE_DISTRIBUTED,
            Mode::Degraded => MODE_DEGRADED,
        }
    }

    fn from_u8(v: u8) -> Self {
        // Only the two constants are ever stored.
        if v == MODE_DISTRIBUTED {
            Mode::Distributed
        } else {
            Mode::Degraded
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Distributed => f.write_str("distributed"),
            Mode::Degraded => f.write_str("degraded"),
        }
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The identity is not in the registry.
    Unprovisioned,
    /// The identity's bucket holds less than one token.
    RateLimited {
        /// Time until one token is available; `None` for budgets that never refill.
        retry_after: Option<Duration>,
    },
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Admitted {
        /// Whole tokens left after this request.
        /// Useful for `X-RateLimit-Remaining` headers.
        remaining: u64,
        /// Mode that served the decision.
        mode: Mode,
    },
    /// The request must be rejected.
    Denied(DenyReason),
}

impl Decision {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }

    /// The denial reason, if denied.
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Denied(reason) => Some(*reason),
            Decision::Admitted { .. } => None,
        }
    }

    fn from_charge(charge: Charge, policy: &BudgetPolicy, mode: Mode) -> Self {
        match charge {
            Charge::Admitted { remaining } => {
                Decision::Admitted { remaining: remaining.floor() as u64, mode }
            }
            Charge::Denied { available } => Decision::Denied(DenyReason::RateLimited {
                retry_after: retry_after(policy, available),
            }),
        }
    }
}

#[derive(Debug)]
struct ModeState {
    mode: AtomicU8,
    // f64 seconds, stored as bits.
    degraded_at: AtomicU64,
    probing: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    registry: ArcSwap<IdentityRegistry>,
    local: LocalBucketStore,
    shared: Option<Arc<dyn SharedStore>>,
    state: ModeState,
    store_timeout: Duration,
    recovery_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Per-identity token-bucket admission control.
///
/// Clones share the same underlying state via `Arc`, so every handle observes the same mode and
/// local buckets.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Start building a limiter over `registry`.
    ///
    /// # Examples
    /// ```
    /// use tollgate::{BudgetPolicy, IdentityRegistry, InMemorySharedStore, RateLimiter};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let registry = IdentityRegistry::new()
    ///     .with("iot-node-satoshi", BudgetPolicy::new(100.0, 100.0).unwrap());
    /// let limiter = RateLimiter::builder(registry)
    ///     .shared_store(InMemorySharedStore::new())
    ///     .build()
    ///     .await
    ///     .unwrap();
    /// assert!(limiter.allow("iot-node-satoshi").await.is_admitted());
    /// assert!(!limiter.allow("someone-else").await.is_admitted());
    /// # }
    /// ```
    pub fn builder(registry: IdentityRegistry) -> RateLimiterBuilder {
        RateLimiterBuilder::new(registry)
    }

    /// Decide whether one request from `identity` may proceed.
    ///
    /// Unprovisioned identities are denied in either mode without touching any store.
    pub async fn allow(&self, identity: &str) -> Decision {
        let resolved = self.inner.registry.load().resolve(identity);
        let Some((identity, policy)) = resolved else {
            tracing::debug!(identity, "unprovisioned identity denied");
            return Decision::Denied(DenyReason::Unprovisioned);
        };

        let now = self.inner.clock.now_secs();
        let decision = match self.mode() {
            Mode::Distributed => self.allow_distributed(&identity, &policy, now).await,
            Mode::Degraded => {
                if self.recovery_due(now) && self.try_recover(now).await {
                    self.allow_distributed(&identity, &policy, now).await
                } else {
                    self.allow_local(&identity, &policy, now)
                }
            }
        };

        if let Decision::Admitted { mode, .. } = decision {
            self.emit(LimiterEvent::Decided { identity, admitted: true, mode });
        } else {
            tracing::debug!(identity = %identity, ?decision, "request denied");
            self.emit(LimiterEvent::Decided { identity, admitted: false, mode: self.mode() });
        }
        decision
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.inner.state.mode.load(Ordering::Acquire))
    }

    /// Replace the identity table. In-flight checks finish against the previous table.
    pub fn reload_registry(&self, registry: IdentityRegistry) {
        tracing::info!(identities = registry.len(), "identity registry reloaded");
        self.inner.registry.store(Arc::new(registry));
    }

    /// Snapshot of the current identity table.
    pub fn registry(&self) -> Arc<IdentityRegistry> {
        self.inner.registry.load_full()
    }

    /// The process-local store used while degraded.
    pub fn local_store(&self) -> &LocalBucketStore {
        &self.inner.local
    }

    async fn allow_distributed(
        &self,
        identity: &Identity,
        policy: &BudgetPolicy,
        now: f64,
    ) -> Decision {
        let Some(shared) = self.inner.shared.as_ref() else {
            // Distributed is only ever entered with a store attached.
            return self.allow_local(identity, policy, now);
        };

        match self.bounded(shared.charge_one(identity, policy, now)).await {
            Ok(charge) => {
                tracing::trace!(identity = %identity, tokens = charge.tokens(), "shared charge");
                Decision::from_charge(charge, policy, Mode::Distributed)
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "shared store failed; serving locally");
                self.emit(LimiterEvent::StoreFailed { error: e.to_string() });
                self.degrade(now);
                self.allow_local(identity, policy, now)
            }
        }
    }

    fn allow_local(&self, identity: &Identity, policy: &BudgetPolicy, now: f64) -> Decision {
        let charge = self.inner.local.charge_one(identity, policy, now);
        tracing::trace!(identity = %identity, tokens = charge.tokens(), "local charge");
        Decision::from_charge(charge, policy, Mode::Degraded)
    }

    fn degrade(&self, now: f64) {
        // Published before the mode so a Degraded reader never sees an older timestamp.
        self.inner.state.degraded_at.store(now.to_bits(), Ordering::Release);
        if self
            .inner
            .state
            .mode
            .compare_exchange(
                Mode::Distributed.to_u8(),
                Mode::Degraded.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::warn!("Rate limiter → degraded");
            self.emit(LimiterEvent::ModeChanged { from: Mode::Distributed, to: Mode::Degraded });
        }
    }

    fn recovery_due(&self, now: f64) -> bool {
        let (Some(_), Some(interval)) = (&self.inner.shared, self.inner.recovery_interval) else {
            return false;
        };
        let since = f64::from_bits(self.inner.state.degraded_at.load(Ordering::Acquire));
        now - since >= interval.as_secs_f64()
    }

    /// Probe the shared store and, if it answers, merge local buckets back and switch to
    /// Distributed. At most one probe runs at a time; losers keep serving locally. The probe and
    /// the merge together are bounded by one store timeout.
    async fn try_recover(&self, now: f64) -> bool {
        struct ProbeGuard<'a>(&'a AtomicBool);
        impl Drop for ProbeGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Release);
            }
        }

        let Some(shared) = self.inner.shared.as_ref() else {
            return false;
        };
        if self
            .inner
            .state
            .probing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = ProbeGuard(&self.inner.state.probing);

        let merged = match self.bounded(self.reconcile_all(&**shared, now)).await {
            Ok(merged) => merged,
            Err(e) => {
                self.probe_failed(now, e);
                return false;
            }
        };
        self.inner.local.clear();

        if self
            .inner
            .state
            .mode
            .compare_exchange(
                Mode::Degraded.to_u8(),
                Mode::Distributed.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            tracing::info!(reconciled = merged, "Rate limiter → distributed");
            self.emit(LimiterEvent::Reconciled { identities: merged });
            self.emit(LimiterEvent::ModeChanged { from: Mode::Degraded, to: Mode::Distributed });
        }
        true
    }

    /// Ping, then lower every shared bucket to its local count. Returns the number merged.
    async fn reconcile_all(&self, shared: &dyn SharedStore, now: f64) -> Result<usize, StoreError> {
        shared.ping().await?;
        let registry = self.inner.registry.load_full();
        let mut merged = 0;
        for (identity, state) in self.inner.local.snapshot_all() {
            // Identities dropped by a registry reload are not carried over.
            let Some(policy) = registry.lookup(identity.as_str()) else {
                continue;
            };
            shared.reconcile(&identity, &policy, state, now).await?;
            merged += 1;
        }
        Ok(merged)
    }

    fn probe_failed(&self, now: f64, error: StoreError) {
        self.inner.state.degraded_at.store(now.to_bits(), Ordering::Release);
        tracing::debug!(error = %error, "recovery probe failed; staying degraded");
        self.emit(LimiterEvent::ProbeFailed { error: error.to_string() });
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.inner.store_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    fn emit(&self, event: LimiterEvent) {
        self.inner.telemetry.emit(event);
    }
}

/// Builder for [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimiterBuilder {
    registry: IdentityRegistry,
    shared: Option<Arc<dyn SharedStore>>,
    store_timeout: Duration,
    recovery_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RateLimiterBuilder {
    fn new(registry: IdentityRegistry) -> Self {
        Self {
            registry,
            shared: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            recovery_interval: Some(DEFAULT_RECOVERY_INTERVAL),
            clock: Arc::new(SystemClock),
            telemetry: Arc::new(NullSink),
        }
    }

    /// Attach a shared coordination store. Without one the limiter is Degraded from the start
    /// and never attempts a connection.
    pub fn shared_store<S: SharedStore + 'static>(mut self, store: S) -> Self {
        self.shared = Some(Arc::new(store));
        self
    }

    /// Bound on each shared-store round trip (default 200 ms).
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Wait between recovery probes while degraded (default 30 s).
    pub fn recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = Some(interval);
        self
    }

    /// Never probe after degrading; the limiter stays Degraded for its lifetime.
    pub fn without_recovery(mut self) -> Self {
        self.recovery_interval = None;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Route limiter events to `sink`.
    pub fn telemetry<T: TelemetrySink + 'static>(mut self, sink: T) -> Self {
        self.telemetry = Arc::new(sink);
        self
    }

    /// Validate settings, probe the shared store once, and pick the initial mode.
    pub async fn build(self) -> Result<RateLimiter, BuildError> {
        if self.store_timeout.is_zero() {
            return Err(BuildError::InvalidStoreTimeout(self.store_timeout));
        }
        if let Some(interval) = self.recovery_interval {
            if interval.is_zero() {
                return Err(BuildError::InvalidRecoveryInterval(interval));
            }
        }

        let now = self.clock.now_secs();
        let mode = match &self.shared {
            None => {
                tracing::info!("no shared store configured; limiting in-process only");
                Mode::Degraded
            }
            Some(store) => {
                let probe = tokio::time::timeout(self.store_timeout, store.ping()).await;
                match probe {
                    Ok(Ok(())) => {
                        tracing::info!("rate limiting using shared store");
                        Mode::Distributed
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "shared store unreachable; falling back to in-process limiter");
                        Mode::Degraded
                    }
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?self.store_timeout,
                            "shared store probe timed out; falling back to in-process limiter"
                        );
                        Mode::Degraded
                    }
                }
            }
        };

        Ok(RateLimiter {
            inner: Arc::new(Inner {
                registry: ArcSwap::from_pointee(self.registry),
                local: LocalBucketStore::new(),
                shared: self.shared,
                state: ModeState {
                    mode: AtomicU8::new(mode.to_u8()),
                    degraded_at: AtomicU64::new(now.to_bits()),
                    probing: AtomicBool::new(false),
                },
                store_timeout: self.store_timeout,
                recovery_interval: self.recovery_interval,
                clock: self.clock,
                telemetry: self.telemetry,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::shared::InMemorySharedStore;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;

    fn registry() -> IdentityRegistry {
        IdentityRegistry::new()
            .with("small", BudgetPolicy::new(60.0, 3.0).unwrap())
            .with("burst-only", BudgetPolicy::new(0.0, 2.0).unwrap())
    }

    #[derive(Debug)]
    struct HangingStore;

    #[async_trait]
    impl SharedStore for HangingStore {
        async fn charge_one(
            &self,
            _identity: &Identity,
            _policy: &BudgetPolicy,
            _now: f64,
        ) -> Result<Charge, StoreError> {
            std::future::pending().await
        }

        async fn reconcile(
            &self,
            _identity: &Identity,
            _policy: &BudgetPolicy,
            _local: crate::bucket::TokenBucketState,
            _now: f64,
        ) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Delegates to an in-memory store but takes `delay` per reconcile.
    #[derive(Debug)]
    struct SlowReconcileStore {
        inner: InMemorySharedStore,
        delay: Duration,
    }

    #[async_trait]
    impl SharedStore for SlowReconcileStore {
        async fn charge_one(
            &self,
            identity: &Identity,
            policy: &BudgetPolicy,
            now: f64,
        ) -> Result<Charge, StoreError> {
            self.inner.charge_one(identity, policy, now).await
        }

        async fn reconcile(
            &self,
            identity: &Identity,
            policy: &BudgetPolicy,
            local: crate::bucket::TokenBucketState,
            now: f64,
        ) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.reconcile(identity, policy, local, now).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    async fn degraded_over(
        names: &[String],
        store: &InMemorySharedStore,
        clock: &ManualClock,
        sink: &MemorySink,
    ) -> RateLimiter {
        let registry = names.iter().fold(IdentityRegistry::new(), |reg, name| {
            reg.with(name.as_str(), BudgetPolicy::new(60.0, 10.0).unwrap())
        });
        let limiter = RateLimiter::builder(registry)
            .shared_store(SlowReconcileStore { inner: store.clone(), delay: Duration::from_millis(150) })
            .clock(clock.clone())
            .telemetry(sink.clone())
            .build()
            .await
            .unwrap();
        store.set_offline(true);
        for name in names {
            assert!(limiter.allow(name).await.is_admitted());
        }
        assert_eq!(limiter.mode(), Mode::Degraded);
        store.set_offline(false);
        limiter
    }

    #[tokio::test]
    async fn starts_degraded_without_store() {
        let limiter = RateLimiter::builder(registry()).build().await.unwrap();
        assert_eq!(limiter.mode(), Mode::Degraded);
        assert!(limiter.allow("small").await.is_admitted());
        assert_eq!(limiter.local_store().len(), 1);
    }

    #[tokio::test]
    async fn starts_distributed_when_probe_succeeds() {
        let limiter = RateLimiter::builder(registry())
            .shared_store(InMemorySharedStore::new())
            .build()
            .await
            .unwrap();
        assert_eq!(limiter.mode(), Mode::Distributed);
        let d = limiter.allow("small").await;
        assert_eq!(d, Decision::Admitted { remaining: 2, mode: Mode::Distributed });
        assert!(limiter.local_store().is_empty());
    }

    #[tokio::test]
    async fn starts_degraded_when_probe_fails() {
        let store = InMemorySharedStore::new();
        store.set_offline(true);
        let limiter = RateLimiter::builder(registry()).shared_store(store).build().await.unwrap();
        assert_eq!(limiter.mode(), Mode::Degraded);
    }

    #[tokio::test]
    async fn rejects_zero_durations() {
        let err = RateLimiter::builder(registry())
            .store_timeout(Duration::ZERO)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err, BuildError::InvalidStoreTimeout(Duration::ZERO));

        let err = RateLimiter::builder(registry())
            .recovery_interval(Duration::ZERO)
            .build()
            .await
            .unwrap_err();
        assert_eq!(err, BuildError::InvalidRecoveryInterval(Duration::ZERO));
    }

    #[tokio::test]
    async fn unprovisioned_identity_touches_no_store() {
        let store = InMemorySharedStore::new();
        let limiter =
            RateLimiter::builder(registry()).shared_store(store.clone()).build().await.unwrap();
        assert_eq!(limiter.allow("ghost").await, Decision::Denied(DenyReason::Unprovisioned));
        assert!(store.snapshot("ghost").is_none());
        assert!(limiter.local_store().is_empty());
    }

    #[tokio::test]
    async fn denial_reports_retry_after() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::builder(registry()).clock(clock.clone()).build().await.unwrap();
        for _ in 0..3 {
            assert!(limiter.allow("small").await.is_admitted());
        }
        let denied = limiter.allow("small").await;
        assert_eq!(
            denied.deny_reason(),
            Some(DenyReason::RateLimited { retry_after: Some(Duration::from_secs(1)) })
        );
        for _ in 0..2 {
            assert!(limiter.allow("burst-only").await.is_admitted());
        }
        assert_eq!(
            limiter.allow("burst-only").await.deny_reason(),
            Some(DenyReason::RateLimited { retry_after: None })
        );
    }

    #[tokio::test]
    async fn hanging_store_times_out_into_degraded() {
        let sink = MemorySink::new();
        let limiter = RateLimiter::builder(registry())
            .shared_store(HangingStore)
            .store_timeout(Duration::from_millis(20))
            .telemetry(sink.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(limiter.mode(), Mode::Distributed);

        let d = limiter.allow("small").await;
        assert_eq!(d, Decision::Admitted { remaining: 2, mode: Mode::Degraded });
        assert_eq!(limiter.mode(), Mode::Degraded);
        assert_eq!(sink.transitions(), vec![(Mode::Distributed, Mode::Degraded)]);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            LimiterEvent::StoreFailed { error } if error.contains("timed out")
        )));
    }

    #[tokio::test]
    async fn reload_registry_changes_budgets() {
        let limiter = RateLimiter::builder(registry()).build().await.unwrap();
        assert!(!limiter.allow("late-joiner").await.is_admitted());
        limiter.reload_registry(
            IdentityRegistry::new().with("late-joiner", BudgetPolicy::new(1.0, 1.0).unwrap()),
        );
        assert!(limiter.allow("late-joiner").await.is_admitted());
        assert_eq!(limiter.allow("small").await, Decision::Denied(DenyReason::Unprovisioned));
        assert_eq!(limiter.registry().len(), 1);
    }

    #[tokio::test]
    async fn clones_share_mode_and_buckets() {
        let limiter = RateLimiter::builder(registry()).build().await.unwrap();
        let other = limiter.clone();
        for _ in 0..2 {
            assert!(limiter.allow("burst-only").await.is_admitted());
        }
        assert!(!other.allow("burst-only").await.is_admitted());
    }

    #[tokio::test]
    async fn vanishing_rate_denies_without_retry_hint() {
        let registry =
            IdentityRegistry::new().with("slow", BudgetPolicy::new(1e-18, 1.0).unwrap());
        let limiter = RateLimiter::builder(registry).build().await.unwrap();
        assert!(limiter.allow("slow").await.is_admitted());
        assert_eq!(
            limiter.allow("slow").await,
            Decision::Denied(DenyReason::RateLimited { retry_after: None })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reconcile_is_bounded_by_one_timeout() {
        let names: Vec<String> = (0..20).map(|i| format!("d{i}")).collect();
        let clock = ManualClock::new();
        let store = InMemorySharedStore::new();
        let sink = MemorySink::new();
        let limiter = degraded_over(&names, &store, &clock, &sink).await;
        assert_eq!(limiter.local_store().len(), 20);

        clock.advance(Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let decision = limiter.allow("d0").await;
        assert!(started.elapsed() < Duration::from_millis(250));

        // The merge did not finish: still degraded, served locally.
        assert_eq!(decision, Decision::Admitted { remaining: 9, mode: Mode::Degraded });
        assert_eq!(limiter.mode(), Mode::Degraded);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            LimiterEvent::ProbeFailed { error } if error.contains("timed out")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reconcile_within_timeout_recovers() {
        let names = vec!["d0".to_string()];
        let clock = ManualClock::new();
        let store = InMemorySharedStore::new();
        let sink = MemorySink::new();
        let limiter = degraded_over(&names, &store, &clock, &sink).await;

        clock.advance(Duration::from_secs(30));
        assert_eq!(
            limiter.allow("d0").await,
            Decision::Admitted { remaining: 9, mode: Mode::Distributed }
        );
        assert!(limiter.local_store().is_empty());
    }

    #[tokio::test]
    async fn recovery_interval_counts_from_the_outage() {
        let clock = ManualClock::new();
        let store = InMemorySharedStore::new();
        let limiter = RateLimiter::builder(registry())
            .shared_store(store.clone())
            .clock(clock.clone())
            .build()
            .await
            .unwrap();

        clock.advance(Duration::from_secs(100));
        store.set_offline(true);
        assert!(limiter.allow("small").await.is_admitted());
        store.set_offline(false);

        clock.advance(Duration::from_secs(29));
        limiter.allow("small").await;
        assert_eq!(limiter.mode(), Mode::Degraded);

        clock.advance(Duration::from_secs(1));
        limiter.allow("small").await;
        assert_eq!(limiter.mode(), Mode::Distributed);
    }
}
