#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tollgate
//!
//! Per-identity admission control for ingestion endpoints: a continuous token bucket per
//! caller, shared across every process through a coordination store, with an in-process
//! fallback when that store is unreachable.
//!
//! ## Features
//!
//! - **Token buckets** with fractional refill (`rate_per_minute`) and a burst `capacity`
//! - **Distributed mode**: one atomic read-refill-charge-write per check in a [`SharedStore`]
//! - **Degraded mode**: process-local buckets once the store fails or times out
//! - **Recovery**: periodic re-probe that merges local state back into the store
//! - **Tower middleware** mapping decisions to authorization and throughput rejections
//! - **Hot-reloadable** identity registry
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{BudgetPolicy, IdentityRegistry, InMemorySharedStore, Mode, RateLimiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = IdentityRegistry::new()
//!         .with("iot-node-satoshi", BudgetPolicy::new(100.0, 100.0).unwrap());
//!
//!     let limiter = RateLimiter::builder(registry)
//!         .shared_store(InMemorySharedStore::new())
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(limiter.mode(), Mode::Distributed);
//!     assert!(limiter.allow("iot-node-satoshi").await.is_admitted());
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod local;
pub mod middleware;
pub mod prelude;
pub mod registry;
pub mod shared;
pub mod telemetry;

// Re-exports
pub use bucket::{Charge, TokenBucketState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LimiterConfig;
pub use error::{AdmissionError, BuildError, ConfigError, PolicyError, StoreError};
pub use limiter::{Decision, DenyReason, Mode, RateLimiter, RateLimiterBuilder};
pub use local::LocalBucketStore;
pub use middleware::{admit, Admission, AdmissionLayer, AdmissionService, Identified};
pub use registry::{BudgetPolicy, Identity, IdentityRegistry};
pub use shared::{InMemorySharedStore, SharedStore};
pub use telemetry::{LimiterEvent, LogSink, MemorySink, NullSink, TelemetrySink};
