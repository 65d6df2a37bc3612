//! Per-institution admission limiting over the shared counter store.
//!
//! Fixed window keyed by the caller's BIC; the peer address is the fallback
//! key for unauthenticated flooding only and never feeds a business
//! decision. The ceiling comes from the caller's directory record when one
//! exists, otherwise the static default applies.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::directory::DirectoryService;
use crate::errors::VopError;
use crate::metrics::METRICS;
use crate::middleware::is_probe_path;
use crate::models::AuthenticatedCaller;
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    Rejected { retry_after_secs: u64 },
}

/// Counter-based fixed-window limiter. Shared across all in-flight
/// requests through the injected store; no in-process state.
pub struct FixedWindowLimiter {
    store: Arc<dyn SharedStore>,
    window: Duration,
    default_max: u32,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn SharedStore>, window: Duration, default_max: u32) -> Self {
        FixedWindowLimiter {
            store,
            window,
            default_max,
        }
    }

    pub async fn check(
        &self,
        key: &str,
        max_override: Option<u32>,
    ) -> Result<AdmissionDecision, VopError> {
        let max = max_override.unwrap_or(self.default_max);
        let counter_key = format!("rl:vop:{}", key);

        let window = self.store.incr_with_expiry(&counter_key, self.window).await?;

        if window.count > max as u64 {
            return Ok(AdmissionDecision::Rejected {
                retry_after_secs: window.remaining_secs,
            });
        }

        Ok(AdmissionDecision::Admitted)
    }
}

pub struct AdmissionControl {
    limiter: Arc<FixedWindowLimiter>,
    directory: Arc<DirectoryService>,
}

impl AdmissionControl {
    pub fn new(limiter: Arc<FixedWindowLimiter>, directory: Arc<DirectoryService>) -> Self {
        AdmissionControl { limiter, directory }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AdmissionControl
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AdmissionControlMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdmissionControlMiddleware {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            directory: self.directory.clone(),
        }))
    }
}

pub struct AdmissionControlMiddleware<S> {
    service: Rc<S>,
    limiter: Arc<FixedWindowLimiter>,
    directory: Arc<DirectoryService>,
}

impl<S, B> Service<ServiceRequest> for AdmissionControlMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if is_probe_path(req.path()) {
            let fut = self.service.call(req);
            return Box::pin(async move { fut.await });
        }

        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let directory = self.directory.clone();

        Box::pin(async move {
            let caller_bic = req
                .extensions()
                .get::<AuthenticatedCaller>()
                .map(|caller| caller.bic.clone());

            let (key, max_override) = match &caller_bic {
                Some(bic) => {
                    let ceiling = directory.rate_limit_for(bic).await.unwrap_or(None);
                    (bic.clone(), ceiling)
                }
                None => {
                    let addr = req
                        .peer_addr()
                        .map(|a| a.ip().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    (addr, None)
                }
            };

            match limiter.check(&key, max_override).await? {
                AdmissionDecision::Admitted => service.call(req).await,
                AdmissionDecision::Rejected { retry_after_secs } => {
                    warn!(key = %key, retry_after_secs, "rate limit exceeded");
                    METRICS
                        .rate_limit_hits_total
                        .with_label_values(&[caller_bic.as_deref().unwrap_or("unknown")])
                        .inc();

                    Err(VopError::RateLimited { retry_after_secs }.into())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn admits_until_the_ceiling_then_rejects() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store, Duration::from_secs(10), 3);

        for _ in 0..3 {
            assert_eq!(
                limiter.check("PRBAUA2X", None).await.unwrap(),
                AdmissionDecision::Admitted
            );
        }

        match limiter.check("PRBAUA2X", None).await.unwrap() {
            AdmissionDecision::Rejected { retry_after_secs } => {
                // Retry hint equals the remaining window.
                assert!(retry_after_secs >= 1 && retry_after_secs <= 10);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn keys_are_isolated_per_institution() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store, Duration::from_secs(10), 1);

        assert_eq!(
            limiter.check("AAAAUA2X", None).await.unwrap(),
            AdmissionDecision::Admitted
        );
        assert_eq!(
            limiter.check("BBBBUA2X", None).await.unwrap(),
            AdmissionDecision::Admitted
        );
        assert!(matches!(
            limiter.check("AAAAUA2X", None).await.unwrap(),
            AdmissionDecision::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn directory_override_takes_precedence() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store, Duration::from_secs(10), 100);

        assert_eq!(
            limiter.check("CCCCUA2X", Some(1)).await.unwrap(),
            AdmissionDecision::Admitted
        );
        assert!(matches!(
            limiter.check("CCCCUA2X", Some(1)).await.unwrap(),
            AdmissionDecision::Rejected { .. }
        ));
    }

    #[tokio::test]
    async fn window_expiry_resets_admission() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = FixedWindowLimiter::new(store, Duration::from_millis(5), 1);

        assert_eq!(
            limiter.check("DDDDUA2X", None).await.unwrap(),
            AdmissionDecision::Admitted
        );
        assert!(matches!(
            limiter.check("DDDDUA2X", None).await.unwrap(),
            AdmissionDecision::Rejected { .. }
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            limiter.check("DDDDUA2X", None).await.unwrap(),
            AdmissionDecision::Admitted
        );
    }
}
