//! Request orchestration: resolve, forward, respond.
//!
//! Each request moves through a linear stage progression; any stage may
//! short-circuit to a terminal business response, but a response is always
//! produced. The overall caller-facing deadline is enforced here so a slow
//! downstream can never hold the caller past it. Requests are stateless
//! one-shots: the same request id submitted twice is forwarded twice.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use vop_protocol::{MatchStatus, Party, ReasonCode, VerificationRequest, VerificationResponse};

use crate::directory::DirectoryService;
use crate::errors::{Result, VopError};
use crate::forwarder::{failure_response, ForwardFailure, Forwarder, UNKNOWN_RESPONDER};
use crate::metrics::METRICS;
use crate::models::{AuthenticatedCaller, DirectoryStatus};

/// Stages of the request lifecycle, in order. Authentication and admission
/// happen in middleware before the orchestrator sees the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authenticated,
    Admitted,
    Validated,
    Resolved,
    Forwarded,
    Completed,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Authenticated => "authenticated",
            Stage::Admitted => "admitted",
            Stage::Validated => "validated",
            Stage::Resolved => "resolved",
            Stage::Forwarded => "forwarded",
            Stage::Completed => "completed",
            Stage::Errored => "errored",
        }
    }
}

fn status_label(status: &MatchStatus) -> &'static str {
    match status {
        MatchStatus::Match => "MATCH",
        MatchStatus::CloseMatch => "CLOSE_MATCH",
        MatchStatus::NoMatch => "NO_MATCH",
        MatchStatus::NotSupported => "NOT_SUPPORTED",
        MatchStatus::Error => "ERROR",
    }
}

/// Grace added on top of the overall deadline for the backstop guard. The
/// forward stage degrades to a business timeout inside the deadline itself,
/// so the backstop only fires when an earlier stage stalls.
const BACKSTOP_GRACE: Duration = Duration::from_millis(500);

pub struct RouterService {
    directory: Arc<DirectoryService>,
    forwarder: Arc<dyn Forwarder>,
    overall_deadline: Duration,
}

impl RouterService {
    pub fn new(
        directory: Arc<DirectoryService>,
        forwarder: Arc<dyn Forwarder>,
        overall_deadline: Duration,
    ) -> Self {
        RouterService {
            directory,
            forwarder,
            overall_deadline,
        }
    }

    /// Process one validated request from an authenticated caller. The
    /// returned `Err` covers gateway faults only (directory store failures);
    /// every downstream condition becomes a business response.
    pub async fn process(
        &self,
        request: &VerificationRequest,
        caller: &AuthenticatedCaller,
    ) -> Result<VerificationResponse> {
        let started = Instant::now();
        METRICS.active_requests.inc();

        // Backstop: if a stage ahead of forwarding (directory lookup, cache)
        // stalls past the whole deadline, the caller gets a 504 rather than
        // an open-ended wait.
        let backstop = self.overall_deadline + BACKSTOP_GRACE;
        let result = match tokio::time::timeout(backstop, self.run(request, started)).await {
            Ok(result) => result,
            Err(_) => Err(VopError::GatewayTimeout),
        };

        METRICS.active_requests.dec();

        match &result {
            Ok(response) => {
                let status = status_label(&response.match_status);
                METRICS
                    .requests_total
                    .with_label_values(&[status, caller.bic.as_str(), &response.responder.bic])
                    .inc();
                METRICS
                    .request_duration_seconds
                    .with_label_values(&[status, caller.bic.as_str(), &response.responder.bic])
                    .observe(started.elapsed().as_secs_f64());
                METRICS
                    .match_status_total
                    .with_label_values(&[status, &response.responder.bic])
                    .inc();

                info!(
                    request_id = %request.request_id,
                    requester_bic = %caller.bic,
                    responder_bic = %response.responder.bic,
                    match_status = status,
                    stage = Stage::Completed.as_str(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "verification completed"
                );
            }
            Err(e) => {
                METRICS
                    .requests_total
                    .with_label_values(&["ERROR", caller.bic.as_str(), UNKNOWN_RESPONDER])
                    .inc();
                METRICS
                    .request_duration_seconds
                    .with_label_values(&["ERROR", caller.bic.as_str(), UNKNOWN_RESPONDER])
                    .observe(started.elapsed().as_secs_f64());
                METRICS
                    .errors_total
                    .with_label_values(&["gateway_fault", caller.bic.as_str()])
                    .inc();

                warn!(
                    request_id = %request.request_id,
                    requester_bic = %caller.bic,
                    stage = Stage::Errored.as_str(),
                    error = %e,
                    "verification failed in the gateway"
                );
            }
        }

        result
    }

    async fn run(
        &self,
        request: &VerificationRequest,
        started: Instant,
    ) -> Result<VerificationResponse> {
        // Stage: Resolved. An unknown prefix never produces an outbound call.
        let Some(entry) = self.directory.resolve_by_iban(&request.payee.iban).await? else {
            info!(
                request_id = %request.request_id,
                stage = Stage::Resolved.as_str(),
                "no responder institution for IBAN"
            );
            return Ok(not_supported_response(
                request,
                "Responder bank not found for this IBAN".to_string(),
            ));
        };

        if entry.status != DirectoryStatus::Active {
            info!(
                request_id = %request.request_id,
                responder_bic = %entry.bic,
                status = entry.status.as_str(),
                stage = Stage::Resolved.as_str(),
                "responder institution is not active"
            );
            let mut response = not_supported_response(
                request,
                format!(
                    "Responder bank is currently {}",
                    entry.status.as_str().to_lowercase()
                ),
            );
            response.responder.bic = entry.bic.clone();
            return Ok(response);
        }

        // Stage: Forwarded. The forwarder has its own downstream deadline;
        // the remaining overall budget caps it so the caller-facing deadline
        // holds even when the stages before forwarding were slow.
        let budget = self.overall_deadline.saturating_sub(started.elapsed());
        let response = match tokio::time::timeout(
            budget,
            self.forwarder.forward(request, &entry),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                warn!(
                    request_id = %request.request_id,
                    responder_bic = %entry.bic,
                    deadline_ms = self.overall_deadline.as_millis() as u64,
                    "overall request deadline exceeded"
                );
                failure_response(
                    &ForwardFailure::Timeout,
                    &request.request_id,
                    &entry.bic,
                    self.overall_deadline,
                )
            }
        };

        Ok(response)
    }
}

/// Terminal response for an IBAN the gateway cannot route.
fn not_supported_response(request: &VerificationRequest, description: String) -> VerificationResponse {
    VerificationResponse {
        request_id: request.request_id.clone(),
        match_status: MatchStatus::NotSupported,
        match_score: None,
        verified_name: None,
        account_type: None,
        account_status: None,
        reason_code: ReasonCode::Nsup,
        reason_description: Some(description),
        responder: Party {
            bic: UNKNOWN_RESPONDER.to_string(),
        },
        timestamp: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectoryEntry;
    use crate::registry::InMemoryRegistry;
    use crate::store::{InMemoryStore, SharedStore, WindowCount};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vop_protocol::{AccountType, Payee, PaymentContext};

    const IBAN: &str = "UA743052990000026007233566001";

    struct MockForwarder {
        calls: AtomicUsize,
        delay: Duration,
        response: VerificationResponse,
    }

    impl MockForwarder {
        fn replying(response: VerificationResponse) -> Self {
            MockForwarder {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                response,
            }
        }

        fn slow(response: VerificationResponse, delay: Duration) -> Self {
            MockForwarder {
                calls: AtomicUsize::new(0),
                delay,
                response,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Forwarder for MockForwarder {
        async fn forward(
            &self,
            _request: &VerificationRequest,
            _destination: &DirectoryEntry,
        ) -> VerificationResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    /// Store whose reads never complete within any reasonable deadline.
    struct StalledStore;

    #[async_trait]
    impl SharedStore for StalledStore {
        async fn get(&self, _key: &str) -> crate::errors::Result<Option<String>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> crate::errors::Result<()> {
            Ok(())
        }

        async fn delete_pattern(&self, _pattern: &str) -> crate::errors::Result<u64> {
            Ok(0)
        }

        async fn incr_with_expiry(
            &self,
            _key: &str,
            _window: Duration,
        ) -> crate::errors::Result<WindowCount> {
            Ok(WindowCount {
                count: 1,
                remaining_secs: 1,
            })
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn request() -> VerificationRequest {
        VerificationRequest {
            request_id: "req-orch-001".to_string(),
            requester: Party {
                bic: "PRBAUA2X".to_string(),
            },
            payee: Payee {
                iban: IBAN.to_string(),
                name: "Петренко Олена Василівна".to_string(),
                account_type: Some(AccountType::Personal),
            },
            additional_info: Some(PaymentContext {
                payment_amount: Some(1500.0),
                payment_currency: Some("UAH".to_string()),
                payment_purpose: None,
            }),
            timestamp: Utc::now(),
        }
    }

    fn caller() -> AuthenticatedCaller {
        AuthenticatedCaller {
            bic: "PRBAUA2X".to_string(),
            client_id: "vop-client-privat".to_string(),
            scopes: vec!["vop:verify".to_string()],
        }
    }

    fn match_response() -> VerificationResponse {
        VerificationResponse {
            request_id: "req-orch-001".to_string(),
            match_status: MatchStatus::Match,
            match_score: Some(100),
            verified_name: Some("Петренко Олена Василівна".to_string()),
            account_type: Some(AccountType::Personal),
            account_status: None,
            reason_code: ReasonCode::Annm,
            reason_description: None,
            responder: Party {
                bic: "PBUAUA2X".to_string(),
            },
            timestamp: Utc::now(),
        }
    }

    fn entry(status: DirectoryStatus) -> DirectoryEntry {
        DirectoryEntry {
            id: 1,
            bic: "PBUAUA2X".to_string(),
            bank_name: "PrivatBank".to_string(),
            endpoint_url: "https://vop.privatbank.ua/vop/verify".to_string(),
            status,
            certificate_fingerprint: None,
            rate_limit_per_sec: 100,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn service_with(
        status: Option<DirectoryStatus>,
        forwarder: Arc<MockForwarder>,
        deadline: Duration,
    ) -> RouterService {
        let registry = Arc::new(InMemoryRegistry::new());
        if let Some(status) = status {
            registry.insert_prefix("UA7430", "PBUAUA2X").await;
            registry.insert_entry(entry(status)).await;
        }
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(DirectoryService::new(registry, store, 300));
        RouterService::new(directory, forwarder, deadline)
    }

    #[tokio::test]
    async fn unknown_iban_short_circuits_without_forwarding() {
        let forwarder = Arc::new(MockForwarder::replying(match_response()));
        let service = service_with(None, forwarder.clone(), Duration::from_secs(5)).await;

        let response = service.process(&request(), &caller()).await.unwrap();

        assert_eq!(response.match_status, MatchStatus::NotSupported);
        assert_eq!(response.reason_code, ReasonCode::Nsup);
        assert_eq!(response.responder.bic, UNKNOWN_RESPONDER);
        assert_eq!(response.request_id, "req-orch-001");
        assert_eq!(forwarder.call_count(), 0);
    }

    #[tokio::test]
    async fn inactive_institution_is_flagged_not_forwarded() {
        let forwarder = Arc::new(MockForwarder::replying(match_response()));
        let service = service_with(
            Some(DirectoryStatus::Maintenance),
            forwarder.clone(),
            Duration::from_secs(5),
        )
        .await;

        let response = service.process(&request(), &caller()).await.unwrap();

        assert_eq!(response.match_status, MatchStatus::NotSupported);
        assert_eq!(response.reason_code, ReasonCode::Nsup);
        assert_eq!(response.responder.bic, "PBUAUA2X");
        assert!(response
            .reason_description
            .unwrap()
            .contains("maintenance"));
        assert_eq!(forwarder.call_count(), 0);
    }

    #[tokio::test]
    async fn active_institution_response_passes_through_unchanged() {
        let forwarder = Arc::new(MockForwarder::replying(match_response()));
        let service = service_with(
            Some(DirectoryStatus::Active),
            forwarder.clone(),
            Duration::from_secs(5),
        )
        .await;

        let response = service.process(&request(), &caller()).await.unwrap();

        assert_eq!(response.match_status, MatchStatus::Match);
        assert_eq!(response.match_score, Some(100));
        assert_eq!(response.responder.bic, "PBUAUA2X");
        assert_eq!(forwarder.call_count(), 1);
    }

    #[tokio::test]
    async fn overall_deadline_caps_a_slow_responder() {
        let forwarder = Arc::new(MockForwarder::slow(
            match_response(),
            Duration::from_millis(200),
        ));
        let service = service_with(
            Some(DirectoryStatus::Active),
            forwarder.clone(),
            Duration::from_millis(50),
        )
        .await;

        let response = service.process(&request(), &caller()).await.unwrap();

        assert_eq!(response.match_status, MatchStatus::Error);
        assert_eq!(response.reason_code, ReasonCode::Tech);
        assert_eq!(response.responder.bic, "PBUAUA2X");
        assert_eq!(forwarder.call_count(), 1);
    }

    #[tokio::test]
    async fn stalled_directory_lookup_becomes_a_gateway_timeout() {
        let registry = Arc::new(InMemoryRegistry::new());
        let directory = Arc::new(DirectoryService::new(registry, Arc::new(StalledStore), 300));
        let forwarder = Arc::new(MockForwarder::replying(match_response()));
        let service = RouterService::new(directory, forwarder.clone(), Duration::from_millis(50));

        let error = service.process(&request(), &caller()).await.unwrap_err();

        assert!(matches!(error, VopError::GatewayTimeout));
        assert_eq!(forwarder.call_count(), 0);
    }

    #[tokio::test]
    async fn repeated_request_ids_are_forwarded_each_time() {
        let forwarder = Arc::new(MockForwarder::replying(match_response()));
        let service = service_with(
            Some(DirectoryStatus::Active),
            forwarder.clone(),
            Duration::from_secs(5),
        )
        .await;

        service.process(&request(), &caller()).await.unwrap();
        service.process(&request(), &caller()).await.unwrap();

        assert_eq!(forwarder.call_count(), 2);
    }
}
