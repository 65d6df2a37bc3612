//! Outbound forwarding to a responding institution.
//!
//! `forward` always returns a well-formed `VerificationResponse`; transport
//! and shape failures never cross this boundary. The failure-to-reason
//! mapping is a total function over the failure classification, implemented
//! as a match on a tagged union rather than error-type inspection.

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use vop_protocol::{MatchStatus, Party, ReasonCode, VerificationRequest, VerificationResponse};

use crate::config::TlsConfig;
use crate::errors::VopError;
use crate::metrics::METRICS;
use crate::models::DirectoryEntry;

/// Sentinel responder identity when the destination itself could not be
/// determined.
pub const UNKNOWN_RESPONDER: &str = "UNKNOWN";

/// Classification of everything that can go wrong downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardFailure {
    /// The forwarding deadline elapsed before a response arrived.
    Timeout,
    /// The destination explicitly reported itself unavailable (503).
    Unavailable,
    /// The destination was reachable but returned another error status.
    ErrorStatus(u16),
    /// Connection established but no usable response body came back.
    EmptyBody,
    /// The connection could not be established at all.
    Connect,
    /// A response arrived but failed shape validation.
    MalformedResponse(String),
}

impl ForwardFailure {
    pub fn metric_label(&self) -> &'static str {
        match self {
            ForwardFailure::Timeout => "timeout",
            ForwardFailure::Unavailable => "responder_unavailable",
            ForwardFailure::ErrorStatus(_) => "responder_error",
            ForwardFailure::EmptyBody => "no_response",
            ForwardFailure::Connect => "connect_failure",
            ForwardFailure::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Map a failure class to the business response returned to the caller.
/// Total over `ForwardFailure`; preserves the request id and stamps the
/// destination institution.
pub fn failure_response(
    failure: &ForwardFailure,
    request_id: &str,
    responder_bic: &str,
    deadline: Duration,
) -> VerificationResponse {
    let (reason_code, description) = match failure {
        ForwardFailure::Timeout => (
            ReasonCode::Tech,
            format!("Responder timeout ({}ms)", deadline.as_millis()),
        ),
        ForwardFailure::Unavailable => {
            (ReasonCode::Nsup, "Responder service unavailable".to_string())
        }
        ForwardFailure::ErrorStatus(status) => {
            (ReasonCode::Tech, format!("Responder error: {}", status))
        }
        ForwardFailure::EmptyBody => (ReasonCode::Tech, "No response from responder".to_string()),
        ForwardFailure::Connect => (ReasonCode::Tech, "Unable to reach responder".to_string()),
        ForwardFailure::MalformedResponse(_) => (
            ReasonCode::Tech,
            "Responder returned a malformed response".to_string(),
        ),
    };

    VerificationResponse {
        request_id: request_id.to_string(),
        match_status: MatchStatus::Error,
        match_score: None,
        verified_name: None,
        account_type: None,
        account_status: None,
        reason_code,
        reason_description: Some(description),
        responder: Party {
            bic: responder_bic.to_string(),
        },
        timestamp: Utc::now(),
    }
}

/// Required-field check on a decoded responder payload. The closed
/// `matchStatus` enumeration is already enforced during deserialization.
pub fn validate_response_shape(response: &VerificationResponse) -> Result<(), String> {
    if response.request_id.is_empty() {
        return Err("missing requestId in response".to_string());
    }
    if response.responder.bic.is_empty() {
        return Err("missing responder.bic in response".to_string());
    }
    Ok(())
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        request: &VerificationRequest,
        destination: &DirectoryEntry,
    ) -> VerificationResponse;
}

pub struct HttpForwarder {
    http: reqwest::Client,
    deadline: Duration,
}

impl HttpForwarder {
    pub fn new(http: reqwest::Client, deadline: Duration) -> Self {
        HttpForwarder { http, deadline }
    }

    /// Build the outbound client: mTLS identity and CA from the gateway's
    /// own trust material, bounded by the forwarding deadline.
    pub fn build_client(tls: &TlsConfig, deadline: Duration) -> Result<reqwest::Client, VopError> {
        let mut builder = reqwest::Client::builder()
            .timeout(deadline)
            .user_agent("VoP-Router/1.0");

        if tls.mtls_enabled {
            let cert_pem = fs::read(&tls.cert_path)
                .map_err(|e| VopError::Configuration(format!("cannot read TLS cert: {}", e)))?;
            let key_pem = fs::read(&tls.key_path)
                .map_err(|e| VopError::Configuration(format!("cannot read TLS key: {}", e)))?;

            let identity = reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem)
                .map_err(|e| VopError::Configuration(format!("invalid TLS identity: {}", e)))?;

            let ca_pem = fs::read(&tls.ca_path)
                .map_err(|e| VopError::Configuration(format!("cannot read TLS CA: {}", e)))?;
            let ca = reqwest::Certificate::from_pem(&ca_pem)
                .map_err(|e| VopError::Configuration(format!("invalid TLS CA: {}", e)))?;

            builder = builder.identity(identity).add_root_certificate(ca);
        }

        builder
            .build()
            .map_err(|e| VopError::Configuration(format!("cannot build HTTP client: {}", e)))
    }

    async fn send(
        &self,
        request: &VerificationRequest,
        destination: &DirectoryEntry,
    ) -> Result<VerificationResponse, ForwardFailure> {
        let result = self
            .http
            .post(&destination.endpoint_url)
            .json(request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ForwardFailure::Timeout),
            Err(e) if e.is_connect() => return Err(ForwardFailure::Connect),
            Err(e) => {
                warn!(error = %e, "request setup failure");
                return Err(ForwardFailure::Connect);
            }
        };

        let status = response.status();
        if status.as_u16() == 503 {
            return Err(ForwardFailure::Unavailable);
        }
        if !status.is_success() {
            return Err(ForwardFailure::ErrorStatus(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|_| ForwardFailure::EmptyBody)?;
        if body.is_empty() {
            return Err(ForwardFailure::EmptyBody);
        }

        let decoded: VerificationResponse = serde_json::from_slice(&body)
            .map_err(|e| ForwardFailure::MalformedResponse(e.to_string()))?;

        validate_response_shape(&decoded).map_err(ForwardFailure::MalformedResponse)?;

        Ok(decoded)
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        request: &VerificationRequest,
        destination: &DirectoryEntry,
    ) -> VerificationResponse {
        let started = Instant::now();

        info!(
            request_id = %request.request_id,
            responder_bic = %destination.bic,
            endpoint = %destination.endpoint_url,
            "forwarding request to responder"
        );

        match self.send(request, destination).await {
            Ok(response) => {
                METRICS
                    .responder_latency_seconds
                    .with_label_values(&[destination.bic.as_str(), "success"])
                    .observe(started.elapsed().as_secs_f64());

                info!(
                    request_id = %request.request_id,
                    responder_bic = %destination.bic,
                    match_status = ?response.match_status,
                    "received response from responder"
                );

                response
            }
            Err(failure) => {
                METRICS
                    .responder_latency_seconds
                    .with_label_values(&[destination.bic.as_str(), "error"])
                    .observe(started.elapsed().as_secs_f64());
                METRICS
                    .errors_total
                    .with_label_values(&[failure.metric_label(), request.requester.bic.as_str()])
                    .inc();

                error!(
                    request_id = %request.request_id,
                    responder_bic = %destination.bic,
                    failure = ?failure,
                    "forwarding failed"
                );

                failure_response(
                    &failure,
                    &request.request_id,
                    &destination.bic,
                    self.deadline,
                )
            }
        }
    }
}
