//! Clock abstractions used by the token-bucket arithmetic.
//!
//! Bucket timestamps travel to the shared store and must agree across processes, so the
//! limiter works in wall-clock seconds rather than a process-local monotonic clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in (fractional) seconds.
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Notes: may step backwards under NTP adjustment; the bucket math clamps negative elapsed
/// time to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

/// Manually driven clock with microsecond resolution.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicI64>,
}

impl ManualClock {
    /// Clock starting at `t = 0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock starting at the given number of seconds.
    pub fn starting_at(secs: u64) -> Self {
        let clock = Self::new();
        clock.micros.store(secs.saturating_mul(1_000_000) as i64, Ordering::SeqCst);
        clock
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }

    /// Move the clock backward, simulating a wall-clock step.
    pub fn rewind(&self, by: Duration) {
        self.micros.fetch_sub(by.as_micros() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
