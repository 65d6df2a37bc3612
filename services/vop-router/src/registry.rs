//! Durable participant registry access.
//!
//! The registry owns directory records; the resolver only reads them. Point
//! lookups only, no transactional multi-row semantics. Entries are returned
//! regardless of status so the orchestrator can distinguish "unknown
//! institution" from "institution present but inactive".

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::models::{DirectoryEntry, DirectoryStatus};

#[async_trait]
pub trait DirectoryRegistry: Send + Sync {
    /// Resolve an IBAN routing prefix to the owning institution's BIC.
    async fn find_bic_by_prefix(&self, iban_prefix: &str) -> Result<Option<String>>;

    /// Fetch the full directory record for an institution.
    async fn find_entry(&self, bic: &str) -> Result<Option<DirectoryEntry>>;

    /// Administrative status change. Out-of-band in production; exposed here
    /// so the resolver can couple it with cache invalidation.
    async fn update_status(&self, bic: &str, status: DirectoryStatus) -> Result<()>;
}

// =============================================================================
// POSTGRES REGISTRY
// =============================================================================

pub struct PgDirectoryRegistry {
    pool: Arc<PgPool>,
}

impl PgDirectoryRegistry {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PgDirectoryRegistry { pool }
    }
}

#[async_trait]
impl DirectoryRegistry for PgDirectoryRegistry {
    async fn find_bic_by_prefix(&self, iban_prefix: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT bic
            FROM iban_prefix_mapping
            WHERE iban_prefix = $1
            LIMIT 1
            "#,
        )
        .bind(iban_prefix)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|(bic,)| bic))
    }

    async fn find_entry(&self, bic: &str) -> Result<Option<DirectoryEntry>> {
        let entry = sqlx::query_as::<_, DirectoryEntry>(
            r#"
            SELECT
                id, bic, bank_name, endpoint_url, status,
                certificate_fingerprint, rate_limit_per_sec,
                created_at, updated_at
            FROM vop_directory
            WHERE bic = $1
            LIMIT 1
            "#,
        )
        .bind(bic)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(entry)
    }

    async fn update_status(&self, bic: &str, status: DirectoryStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE vop_directory
            SET status = $1, updated_at = NOW()
            WHERE bic = $2
            "#,
        )
        .bind(status.as_str())
        .bind(bic)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

// =============================================================================
// IN-MEMORY REGISTRY (tests)
// =============================================================================

#[derive(Default)]
pub struct InMemoryRegistry {
    prefixes: RwLock<HashMap<String, String>>,
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_prefix(&self, prefix: &str, bic: &str) {
        self.prefixes
            .write()
            .await
            .insert(prefix.to_string(), bic.to_string());
    }

    pub async fn insert_entry(&self, entry: DirectoryEntry) {
        self.entries.write().await.insert(entry.bic.clone(), entry);
    }
}

#[async_trait]
impl DirectoryRegistry for InMemoryRegistry {
    async fn find_bic_by_prefix(&self, iban_prefix: &str) -> Result<Option<String>> {
        Ok(self.prefixes.read().await.get(iban_prefix).cloned())
    }

    async fn find_entry(&self, bic: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.entries.read().await.get(bic).cloned())
    }

    async fn update_status(&self, bic: &str, status: DirectoryStatus) -> Result<()> {
        if let Some(entry) = self.entries.write().await.get_mut(bic) {
            entry.status = status;
            entry.updated_at = chrono::Utc::now();
        }
        Ok(())
    }
}
