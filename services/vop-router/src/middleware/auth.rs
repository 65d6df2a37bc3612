//! Credential gate: combined mutual-TLS and OAuth 2.0 authentication.
//!
//! The certificate-derived identity and the token-derived identity are two
//! independently sourced facts merged into one immutable
//! `AuthenticatedCaller`. Both checks are pure validations against external
//! trust material (the CA bundle enforced at the TLS layer, the JWKS key
//! set); the only side effect is attaching the caller to the request.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::future::{ready, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::errors::VopError;
use crate::jwks::JwksClient;
use crate::middleware::is_probe_path;
use crate::models::{AuthenticatedCaller, ClientCertificate};

static BIC_FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BIC=([A-Za-z0-9]{4,11})").unwrap());
static BARE_BIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,11}$").unwrap());

/// Claims the gateway cares about; expiry and signature are enforced by
/// `jsonwebtoken` itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub exp: usize,
}

/// Derive the institution code from the certificate subject, in order:
/// a `BIC=<code>` field in the common name, a common name that is itself a
/// BIC, then the organizational unit.
pub fn extract_bic(cert: &ClientCertificate) -> Option<String> {
    if let Some(cn) = &cert.subject_cn {
        if let Some(captures) = BIC_FIELD_RE.captures(cn) {
            return Some(captures[1].to_uppercase());
        }
        if BARE_BIC_RE.is_match(cn) {
            return Some(cn.to_uppercase());
        }
    }

    if let Some(ou) = &cert.subject_ou {
        if BARE_BIC_RE.is_match(ou) {
            return Some(ou.to_uppercase());
        }
    }

    None
}

/// Split a space-separated scope claim.
pub fn parse_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .unwrap_or_default()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

pub struct AuthContext {
    pub jwks: JwksClient,
    pub oauth: OAuthConfig,
    pub mtls_enabled: bool,
}

impl AuthContext {
    fn token_validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.oauth.issuer.as_str()]);
        validation.set_audience(&[self.oauth.audience.as_str()]);
        validation
    }
}

pub struct CredentialGate {
    context: Arc<AuthContext>,
}

impl CredentialGate {
    pub fn new(context: Arc<AuthContext>) -> Self {
        CredentialGate { context }
    }
}

impl<S, B> Transform<S, ServiceRequest> for CredentialGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = CredentialGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(CredentialGateMiddleware {
            service: Rc::new(service),
            context: self.context.clone(),
        }))
    }
}

pub struct CredentialGateMiddleware<S> {
    service: Rc<S>,
    context: Arc<AuthContext>,
}

impl<S, B> Service<ServiceRequest> for CredentialGateMiddleware<S>
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
        let context = self.context.clone();

        Box::pin(async move {
            // Step 1: certificate identity.
            let cert_bic = if context.mtls_enabled {
                let Some(cert) = req.conn_data::<ClientCertificate>().cloned() else {
                    warn!("connection presented no verified client certificate");
                    return Err(VopError::Unauthorized(
                        "Client certificate required".to_string(),
                    )
                    .into());
                };

                let Some(bic) = extract_bic(&cert) else {
                    warn!(cn = ?cert.subject_cn, "could not extract BIC from certificate");
                    return Err(VopError::Unauthorized(
                        "Invalid certificate: BIC not found".to_string(),
                    )
                    .into());
                };

                Some(bic)
            } else {
                debug!("mTLS authentication disabled");
                None
            };

            // Step 2: bearer token.
            let token = bearer_token(&req).ok_or_else(|| {
                Error::from(VopError::Unauthorized(
                    "Invalid or missing access token".to_string(),
                ))
            })?;

            let header = decode_header(&token).map_err(|e| {
                warn!(error = %e, "malformed token header");
                Error::from(VopError::Unauthorized(
                    "Invalid or missing access token".to_string(),
                ))
            })?;

            let key = context.jwks.decoding_key(header.kid.as_deref()).await?;

            let token_data =
                decode::<Claims>(&token, &key, &context.token_validation()).map_err(|e| {
                    warn!(error = %e, "token validation failed");
                    Error::from(VopError::Unauthorized(
                        "Invalid or missing access token".to_string(),
                    ))
                })?;

            let scopes = parse_scopes(token_data.claims.scope.as_deref());

            // Step 3: scope enforcement, distinct from authentication.
            if !scopes.iter().any(|s| s == &context.oauth.required_scope) {
                warn!(
                    required = %context.oauth.required_scope,
                    granted = ?scopes,
                    "insufficient scope"
                );
                return Err(VopError::Forbidden(format!(
                    "Required scope: {}",
                    context.oauth.required_scope
                ))
                .into());
            }

            // Step 4: merge both identities into one immutable value. When
            // mTLS is disabled the token subject doubles as the institution
            // identity.
            let caller = AuthenticatedCaller {
                bic: cert_bic.unwrap_or_else(|| token_data.claims.sub.clone()),
                client_id: token_data.claims.sub.clone(),
                scopes,
            };

            debug!(bic = %caller.bic, client_id = %caller.client_id, "authentication successful");
            req.extensions_mut().insert(caller);

            service.call(req).await
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(cn: Option<&str>, ou: Option<&str>) -> ClientCertificate {
        ClientCertificate {
            subject_cn: cn.map(|s| s.to_string()),
            subject_ou: ou.map(|s| s.to_string()),
            fingerprint: "ab:cd".to_string(),
        }
    }

    #[test]
    fn bic_field_in_cn_wins() {
        let cert = cert(Some("BIC=prbaua2x"), Some("PBUAUA2X"));
        assert_eq!(extract_bic(&cert), Some("PRBAUA2X".to_string()));
    }

    #[test]
    fn bare_cn_used_when_it_is_a_bic() {
        let cert = cert(Some("PRBAUA2X"), None);
        assert_eq!(extract_bic(&cert), Some("PRBAUA2X".to_string()));
    }

    #[test]
    fn ou_is_the_fallback() {
        let cert = cert(Some("vop-client.bank.ua"), Some("PRBAUA2X"));
        assert_eq!(extract_bic(&cert), Some("PRBAUA2X".to_string()));
    }

    #[test]
    fn no_identity_yields_none() {
        let cert = cert(Some("some-host.bank.ua"), Some("payments team"));
        assert_eq!(extract_bic(&cert), None);
    }

    #[test]
    fn scopes_split_on_whitespace() {
        assert_eq!(
            parse_scopes(Some("vop:verify directory:read")),
            vec!["vop:verify".to_string(), "directory:read".to_string()]
        );
        assert!(parse_scopes(None).is_empty());
    }
}
