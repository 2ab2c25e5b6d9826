//! Convenient re-exports for common Tollgate types.
pub use crate::{
    config::LimiterConfig,
    error::{AdmissionError, StoreError},
    limiter::{Decision, DenyReason, Mode, RateLimiter, RateLimiterBuilder},
    middleware::{AdmissionLayer, Identified},
    registry::{BudgetPolicy, IdentityRegistry},
    shared::SharedStore,
    telemetry::{LogSink, TelemetrySink},
};
