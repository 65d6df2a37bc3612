use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participation status of an institution in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
pub enum DirectoryStatus {
    Active,
    Inactive,
    Maintenance,
}

impl DirectoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectoryStatus::Active => "ACTIVE",
            DirectoryStatus::Inactive => "INACTIVE",
            DirectoryStatus::Maintenance => "MAINTENANCE",
        }
    }
}

/// Identity record for one participating institution. Owned by the durable
/// registry; the resolver holds a time-bounded cached copy.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryEntry {
    pub id: i64,
    pub bic: String,
    pub bank_name: String,
    pub endpoint_url: String,
    pub status: DirectoryStatus,
    pub certificate_fingerprint: Option<String>,
    pub rate_limit_per_sec: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Many-to-one mapping from an IBAN routing prefix onto a directory entry.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IbanPrefixMapping {
    pub id: i64,
    pub iban_prefix: String,
    pub bic: String,
    pub created_at: DateTime<Utc>,
}

/// Connection-level facts about the peer certificate, captured during the
/// TLS handshake and attached to the connection before any request runs.
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    pub subject_cn: Option<String>,
    pub subject_ou: Option<String>,
    pub fingerprint: String,
}

/// The merged, immutable caller identity: institution identity from the
/// client certificate, subject and scopes from the bearer token. Derived per
/// request and never persisted.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    pub bic: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}

impl AuthenticatedCaller {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_check_is_exact() {
        let caller = AuthenticatedCaller {
            bic: "PRBAUA2X".to_string(),
            client_id: "client-1".to_string(),
            scopes: vec!["vop:verify".to_string(), "directory:read".to_string()],
        };

        assert!(caller.has_scope("vop:verify"));
        assert!(!caller.has_scope("vop"));
        assert!(!caller.has_scope("vop:admin"));
    }

    #[test]
    fn directory_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&DirectoryStatus::Maintenance).unwrap(),
            "\"MAINTENANCE\""
        );
        assert_eq!(DirectoryStatus::Active.as_str(), "ACTIVE");
    }
}
