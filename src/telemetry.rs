//! Telemetry for the admission limiter.
//!
//! The limiter reports what it does as [`LimiterEvent`]s handed to a [`TelemetrySink`]. Sinks
//! are called inline on the admission path, so implementations must be cheap and must not
//! block; anything expensive belongs behind a channel owned by the sink.
//!
//! ```rust
//! use tollgate::telemetry::{LimiterEvent, MemorySink, TelemetrySink};
//! use tollgate::Mode;
//!
//! let sink = MemorySink::new();
//! sink.emit(LimiterEvent::ModeChanged { from: Mode::Distributed, to: Mode::Degraded });
//! assert_eq!(sink.len(), 1);
//! ```

use crate::limiter::Mode;
use crate::registry::Identity;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Events emitted by the limiter.
#[derive(Debug, Clone, PartialEq)]
pub enum LimiterEvent {
    /// The limiter switched between shared and local state.
    ModeChanged {
        /// Mode before the transition.
        from: Mode,
        /// Mode after the transition.
        to: Mode,
    },
    /// A shared-store operation failed; the call was served locally.
    StoreFailed {
        /// Rendered store error.
        error: String,
    },
    /// A recovery probe found the store reachable again and local buckets were merged back.
    Reconciled {
        /// Number of identities merged.
        identities: usize,
    },
    /// A recovery probe failed; the limiter stays degraded.
    ProbeFailed {
        /// Rendered store error.
        error: String,
    },
    /// An admission decision was made.
    Decided {
        /// Caller identity.
        identity: Identity,
        /// Whether the request was admitted.
        admitted: bool,
        /// Mode that served the decision.
        mode: Mode,
    },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::ModeChanged { from, to } => write!(f, "ModeChanged({} -> {})", from, to),
            LimiterEvent::StoreFailed { error } => write!(f, "StoreFailed({})", error),
            LimiterEvent::Reconciled { identities } => {
                write!(f, "Reconciled(identities={})", identities)
            }
            LimiterEvent::ProbeFailed { error } => write!(f, "ProbeFailed({})", error),
            LimiterEvent::Decided { identity, admitted, mode } => {
                write!(f, "Decided({}, admitted={}, mode={})", identity, admitted, mode)
            }
        }
    }
}

/// Consumer of limiter events.
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    /// Record an event. Must not block.
    fn emit(&self, event: LimiterEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn emit(&self, event: LimiterEvent) {
        (**self).emit(event)
    }
}

/// Default sink; drops every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: LimiterEvent) {}
}

/// Forwards events to `tracing` under the `limiter_event` message.
///
/// Mode changes and store failures log at WARN; decisions at TRACE.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn emit(&self, event: LimiterEvent) {
        match &event {
            LimiterEvent::Decided { .. } => tracing::trace!(event = %event, "limiter_event"),
            LimiterEvent::Reconciled { .. } => tracing::info!(event = %event, "limiter_event"),
            _ => tracing::warn!(event = %event, "limiter_event"),
        }
    }
}

/// Bounded in-memory event log for tests and debugging.
///
/// Holds at most `capacity` events; once full, each new event pushes out the oldest one and
/// bumps the [`dropped`](MemorySink::dropped) counter. Clones share the same log.
#[derive(Clone, Debug)]
pub struct MemorySink {
    log: Arc<Mutex<VecDeque<LimiterEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MemorySink {
    /// Sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::bounded(10_000)
    }

    /// Sink holding up to `capacity` events (at least one).
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            log: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<LimiterEvent>> {
        self.log.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the retained events, oldest first.
    pub fn events(&self) -> Vec<LimiterEvent> {
        self.log().iter().cloned().collect()
    }

    /// Only the mode transitions, in order.
    pub fn transitions(&self) -> Vec<(Mode, Mode)> {
        self.log()
            .iter()
            .filter_map(|e| match e {
                LimiterEvent::ModeChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Forget every retained event. The dropped counter is kept.
    pub fn clear(&self) {
        self.log().clear();
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    /// Events pushed out because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&self, event: LimiterEvent) {
        let mut log = self.log();
        if log.len() == self.capacity {
            log.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        log.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_compact() {
        let e = LimiterEvent::ModeChanged { from: Mode::Distributed, to: Mode::Degraded };
        assert_eq!(e.to_string(), "ModeChanged(distributed -> degraded)");
        let d = LimiterEvent::Decided {
            identity: Identity::new("node-7"),
            admitted: false,
            mode: Mode::Degraded,
        };
        assert_eq!(d.to_string(), "Decided(node-7, admitted=false, mode=degraded)");
    }

    #[test]
    fn full_log_drops_oldest() {
        let sink = MemorySink::bounded(2);
        for n in 0..3 {
            sink.emit(LimiterEvent::Reconciled { identities: n });
        }
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.events()[0], LimiterEvent::Reconciled { identities: 1 });
    }

    #[test]
    fn transitions_filters_mode_changes() {
        let sink = MemorySink::new();
        sink.emit(LimiterEvent::StoreFailed { error: "boom".into() });
        sink.emit(LimiterEvent::ModeChanged { from: Mode::Distributed, to: Mode::Degraded });
        assert_eq!(sink.transitions(), vec![(Mode::Distributed, Mode::Degraded)]);
        sink.clear();
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn null_and_log_sinks_accept_events() {
        NullSink.emit(LimiterEvent::Reconciled { identities: 0 });
        LogSink.emit(LimiterEvent::ProbeFailed { error: "refused".into() });
    }
}
