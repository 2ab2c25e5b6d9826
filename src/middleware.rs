//! Tower middleware that gates requests on the admission limiter.
//!
//! The authentication layer runs first and attaches the caller identity to the request; this
//! layer only reads it. Requests expose that identity through [`Identified`].

use crate::error::AdmissionError;
use crate::limiter::{Decision, DenyReason, RateLimiter};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Requests that may carry an authenticated caller identity.
pub trait Identified {
    /// The identity attached by the authentication layer, if any.
    fn identity(&self) -> Option<&str>;
}

impl<T> Identified for (Option<String>, T) {
    fn identity(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Outcome of an admission check at the boundary with the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed.
    Admitted,
    /// No identity, or an identity that is not provisioned.
    Unauthorized,
    /// The identity's budget is exhausted.
    RateLimited,
}

/// Run the admission check for an optional identity without any tower plumbing.
pub async fn admit(limiter: &RateLimiter, identity: Option<&str>) -> Admission {
    match identity {
        None | Some("") => Admission::Unauthorized,
        Some(id) => match limiter.allow(id).await {
            Decision::Admitted { .. } => Admission::Admitted,
            Decision::Denied(DenyReason::Unprovisioned) => Admission::Unauthorized,
            Decision::Denied(DenyReason::RateLimited { .. }) => Admission::RateLimited,
        },
    }
}

/// A layer that enforces per-identity admission using a [`RateLimiter`].
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    limiter: RateLimiter,
}

impl AdmissionLayer {
    /// Create a new admission layer.
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, limiter: self.limiter.clone() }
    }
}

/// Middleware service that enforces admission.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Req: Identified + Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let identity = match req.identity() {
                Some(id) if !id.is_empty() => id.to_owned(),
                _ => return Err(AdmissionError::Unauthenticated),
            };

            match limiter.allow(&identity).await {
                Decision::Admitted { .. } => inner.call(req).await.map_err(AdmissionError::Inner),
                Decision::Denied(DenyReason::Unprovisioned) => Err(AdmissionError::Unprovisioned),
                Decision::Denied(DenyReason::RateLimited { retry_after }) => {
                    Err(AdmissionError::RateLimited { retry_after })
                }
            }
        })
    }
}
