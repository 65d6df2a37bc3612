//! Thin authenticated client for calling the VoP gateway.
//!
//! Wraps `POST /v1/verify` with OAuth client-credentials token management
//! and mutual-TLS transport. Holds no interesting state beyond the cached
//! access token.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;
use vop_protocol::{AccountType, Party, Payee, PaymentContext, VerificationRequest, VerificationResponse};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway request timed out")]
    Timeout,

    #[error("token endpoint rejected credentials: {0}")]
    TokenRejected(String),

    #[error("gateway returned status {status}: {message}")]
    Gateway { status: u16, message: String },

    #[error("TLS material could not be loaded: {0}")]
    Tls(String),
}

/// Configuration for one requesting institution.
#[derive(Debug, Clone)]
pub struct RequesterOptions {
    pub router_url: String,
    pub requester_bic: String,
    pub oauth_token_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    /// Client certificate chain, PEM-encoded, for mutual TLS.
    pub client_cert_pem: Option<Vec<u8>>,
    /// Client private key (PKCS#8), PEM-encoded.
    pub client_key_pem: Option<Vec<u8>>,
    /// CA bundle, PEM-encoded, used to verify the gateway.
    pub ca_pem: Option<Vec<u8>>,
    pub timeout: std::time::Duration,
}

/// Parameters for one verification call.
#[derive(Debug, Clone)]
pub struct VerifyParams {
    pub iban: String,
    pub name: String,
    pub account_type: Option<AccountType>,
    pub payment_amount: Option<f64>,
    pub payment_currency: Option<String>,
    pub payment_purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: i64,
}

fn default_expiry() -> i64 {
    300
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct VopClient {
    http: reqwest::Client,
    options: RequesterOptions,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl VopClient {
    pub fn new(options: RequesterOptions) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder().timeout(options.timeout);

        if let (Some(cert), Some(key)) = (&options.client_cert_pem, &options.client_key_pem) {
            let identity = reqwest::Identity::from_pkcs8_pem(cert, key)
                .map_err(|e| ClientError::Tls(e.to_string()))?;
            builder = builder.identity(identity);
        }
        if let Some(pem) = &options.ca_pem {
            let ca = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClientError::Tls(e.to_string()))?;
            builder = builder.add_root_certificate(ca);
        }

        let http = builder.build()?;

        Ok(VopClient {
            http,
            options,
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Verify a payee against the gateway. Builds the request envelope,
    /// attaches a fresh request id and the caller's BIC.
    pub async fn verify(&self, params: VerifyParams) -> Result<VerificationResponse, ClientError> {
        let token = self.ensure_token().await?;
        let request = build_request(&self.options.requester_bic, params);

        debug!(request_id = %request.request_id, "sending verification request");

        let url = format!("{}/v1/verify", self.options.router_url.trim_end_matches('/'));
        let result = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ClientError::Timeout),
            Err(e) => return Err(ClientError::Transport(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "gateway rejected verification request");
            return Err(ClientError::Gateway {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<VerificationResponse>().await?)
    }

    /// Fetch or reuse a client-credentials access token. A token is renewed
    /// one minute before its stated expiry.
    async fn ensure_token(&self) -> Result<String, ClientError> {
        let mut guard = self.token.lock().await;

        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Utc::now() + Duration::seconds(60) {
                return Ok(cached.access_token.clone());
            }
        }

        let response = self
            .http
            .post(&self.options.oauth_token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.options.oauth_client_id.as_str()),
                ("client_secret", self.options.oauth_client_secret.as_str()),
                ("scope", "vop:verify"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::TokenRejected(message));
        }

        let token: TokenResponse = response.json().await?;
        let access_token = token.access_token.clone();

        *guard = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        });

        Ok(access_token)
    }
}

/// Assemble the wire envelope for one call. The payment context is read
/// before the payee fields are moved out of `params`.
fn build_request(requester_bic: &str, params: VerifyParams) -> VerificationRequest {
    let additional_info = build_payment_context(&params);
    VerificationRequest {
        request_id: generate_request_id(),
        requester: Party {
            bic: requester_bic.to_string(),
        },
        payee: Payee {
            iban: params.iban,
            name: params.name,
            account_type: params.account_type,
        },
        additional_info,
        timestamp: Utc::now(),
    }
}

fn build_payment_context(params: &VerifyParams) -> Option<PaymentContext> {
    if params.payment_amount.is_none()
        && params.payment_currency.is_none()
        && params.payment_purpose.is_none()
    {
        return None;
    }

    Some(PaymentContext {
        payment_amount: params.payment_amount,
        payment_currency: params.payment_currency.clone(),
        payment_purpose: params.payment_purpose.clone(),
    })
}

/// Caller-assigned opaque request token: 1-35 chars, alphanumeric/hyphen.
fn generate_request_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("req-{}", &uuid[..28])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_fits_the_wire_constraints() {
        let id = generate_request_id();
        assert!(id.len() <= 35);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn payment_context_is_omitted_when_empty() {
        let params = VerifyParams {
            iban: "UA743052990000026007233566001".to_string(),
            name: "Test".to_string(),
            account_type: None,
            payment_amount: None,
            payment_currency: None,
            payment_purpose: None,
        };
        assert!(build_payment_context(&params).is_none());

        let with_amount = VerifyParams {
            payment_amount: Some(100.0),
            payment_currency: Some("UAH".to_string()),
            ..params
        };
        let ctx = build_payment_context(&with_amount).unwrap();
        assert_eq!(ctx.payment_amount, Some(100.0));
    }

    #[test]
    fn envelope_carries_payee_and_payment_context() {
        let params = VerifyParams {
            iban: "UA743052990000026007233566001".to_string(),
            name: "Петренко Олена".to_string(),
            account_type: Some(AccountType::Personal),
            payment_amount: Some(2500.0),
            payment_currency: Some("UAH".to_string()),
            payment_purpose: Some("Оренда".to_string()),
        };

        let request = build_request("PRBAUA2X", params);

        assert_eq!(request.requester.bic, "PRBAUA2X");
        assert_eq!(request.payee.iban, "UA743052990000026007233566001");
        assert_eq!(request.payee.name, "Петренко Олена");
        let ctx = request.additional_info.unwrap();
        assert_eq!(ctx.payment_amount, Some(2500.0));
        assert_eq!(ctx.payment_currency.as_deref(), Some("UAH"));
    }
}
