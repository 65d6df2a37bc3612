//! Published signing-key provider for bearer-token verification.
//!
//! Fetches the authorization server's JWKS document over HTTPS and caches
//! the keys in-process for a bounded interval. A lookup for an unknown key
//! id triggers one refresh, which covers routine key rotation.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::errors::VopError;

const REFRESH_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

struct CachedKeys {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
}

pub struct JwksClient {
    http: reqwest::Client,
    jwks_uri: String,
    cache: Arc<RwLock<Option<CachedKeys>>>,
}

impl JwksClient {
    pub fn new(jwks_uri: String) -> Self {
        JwksClient {
            http: reqwest::Client::new(),
            jwks_uri,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Resolve a decoding key for the given key id. Without a key id, the
    /// first RSA key in the set is used.
    pub async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, VopError> {
        if let Some(key) = self.lookup_cached(kid).await? {
            return Ok(key);
        }

        self.refresh().await?;

        match self.lookup_cached(kid).await? {
            Some(key) => Ok(key),
            None => Err(VopError::Unauthorized(
                "token signed with an unknown key".to_string(),
            )),
        }
    }

    async fn lookup_cached(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, VopError> {
        let guard = self.cache.read().await;

        let Some(cached) = guard.as_ref() else {
            return Ok(None);
        };
        if cached.fetched_at.elapsed() > REFRESH_INTERVAL {
            return Ok(None);
        }

        let jwk = match kid {
            Some(kid) => cached.keys.get(kid),
            None => cached.keys.values().next(),
        };

        match jwk {
            Some(jwk) => Ok(Some(to_decoding_key(jwk)?)),
            None => Ok(None),
        }
    }

    async fn refresh(&self) -> Result<(), VopError> {
        debug!(uri = %self.jwks_uri, "fetching JWKS document");

        let document: JwksDocument = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| VopError::Internal(format!("JWKS fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| VopError::Internal(format!("JWKS parse failed: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
            keys.insert(kid, jwk);
        }

        if keys.is_empty() {
            warn!("JWKS document contained no usable RSA keys");
        }

        let mut guard = self.cache.write().await;
        *guard = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(())
    }
}

fn to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, VopError> {
    let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
        return Err(VopError::Unauthorized(
            "signing key is missing RSA components".to_string(),
        ));
    };

    DecodingKey::from_rsa_components(n, e)
        .map_err(|e| VopError::Internal(format!("invalid RSA key in JWKS: {}", e)))
}
