//! IBAN-to-institution directory resolution, cache-aside over the durable
//! registry.
//!
//! Consistency contract: cached entries may be stale for at most the
//! configured TTL. An administrative status change invalidates every cached
//! routing key before it is considered complete, so a read immediately after
//! an acknowledged invalidation never observes the pre-change value.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use vop_protocol::iban;

use crate::errors::Result;
use crate::metrics::METRICS;
use crate::models::{DirectoryEntry, DirectoryStatus};
use crate::registry::DirectoryRegistry;
use crate::store::SharedStore;

/// Cache key prefixes.
pub mod keys {
    pub const IBAN_ROUTE: &str = "directory:iban";
    pub const RATE_LIMIT: &str = "directory:limit";
}

pub struct DirectoryService {
    registry: Arc<dyn DirectoryRegistry>,
    store: Arc<dyn SharedStore>,
    cache_ttl_secs: u64,
}

impl DirectoryService {
    pub fn new(
        registry: Arc<dyn DirectoryRegistry>,
        store: Arc<dyn SharedStore>,
        cache_ttl_secs: u64,
    ) -> Self {
        DirectoryService {
            registry,
            store,
            cache_ttl_secs,
        }
    }

    /// Resolve the institution owning an IBAN. `Ok(None)` means the IBAN's
    /// routing prefix is unknown to the registry; it is never an error.
    pub async fn resolve_by_iban(&self, iban: &str) -> Result<Option<DirectoryEntry>> {
        let started = Instant::now();

        let Some(prefix) = iban::routing_prefix(iban) else {
            return Ok(None);
        };

        let cache_key = format!("{}:{}", keys::IBAN_ROUTE, prefix);

        if let Some(cached) = self.store.get(&cache_key).await? {
            match serde_json::from_str::<DirectoryEntry>(&cached) {
                Ok(entry) => {
                    debug!(prefix, bic = %entry.bic, "directory cache hit");
                    METRICS
                        .directory_lookup_duration_seconds
                        .observe(started.elapsed().as_secs_f64());
                    return Ok(Some(entry));
                }
                Err(e) => {
                    // A corrupt cached value falls through to the registry.
                    warn!(prefix, error = %e, "failed to deserialize cached directory entry");
                }
            }
        }

        let Some(bic) = self.registry.find_bic_by_prefix(prefix).await? else {
            debug!(prefix, "no institution mapped for IBAN prefix");
            METRICS
                .directory_lookup_duration_seconds
                .observe(started.elapsed().as_secs_f64());
            return Ok(None);
        };

        let Some(entry) = self.registry.find_entry(&bic).await? else {
            warn!(prefix, bic = %bic, "prefix mapping points at a missing directory entry");
            METRICS
                .directory_lookup_duration_seconds
                .observe(started.elapsed().as_secs_f64());
            return Ok(None);
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            self.store
                .set_ex(&cache_key, &json, self.cache_ttl_secs)
                .await?;
        }

        METRICS
            .directory_lookup_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        Ok(Some(entry))
    }

    /// Per-institution admission ceiling, cached alongside the routing data.
    /// Falls back to `None` when the caller is not in the directory.
    pub async fn rate_limit_for(&self, bic: &str) -> Result<Option<u32>> {
        let cache_key = format!("{}:{}", keys::RATE_LIMIT, bic);

        if let Some(cached) = self.store.get(&cache_key).await? {
            if let Ok(limit) = cached.parse::<u32>() {
                return Ok(Some(limit));
            }
        }

        let Some(entry) = self.registry.find_entry(bic).await? else {
            return Ok(None);
        };

        let limit = entry.rate_limit_per_sec.max(0) as u32;
        self.store
            .set_ex(&cache_key, &limit.to_string(), self.cache_ttl_secs)
            .await?;

        Ok(Some(limit))
    }

    /// Administrative status change. The registry write and the cache
    /// invalidation both complete before this returns; routing keys are
    /// many-to-one onto institutions, so all of them are dropped.
    pub async fn update_status(&self, bic: &str, status: DirectoryStatus) -> Result<()> {
        self.registry.update_status(bic, status).await?;

        self.store
            .delete_pattern(&format!("{}:*", keys::IBAN_ROUTE))
            .await?;
        self.store
            .delete_pattern(&format!("{}:{}", keys::RATE_LIMIT, bic))
            .await?;

        debug!(bic, status = status.as_str(), "directory entry status updated");
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::store::InMemoryStore;
    use chrono::Utc;

    const IBAN: &str = "UA743052990000026007233566001";

    fn entry(bic: &str, status: DirectoryStatus) -> DirectoryEntry {
        DirectoryEntry {
            id: 1,
            bic: bic.to_string(),
            bank_name: "Test Bank".to_string(),
            endpoint_url: "https://bank.example.test/vop/verify".to_string(),
            status,
            certificate_fingerprint: None,
            rate_limit_per_sec: 50,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn service_with(
        bic: &str,
        status: DirectoryStatus,
    ) -> (DirectoryService, Arc<InMemoryRegistry>, Arc<InMemoryStore>) {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert_prefix("UA7430", bic).await;
        registry.insert_entry(entry(bic, status)).await;

        let store = Arc::new(InMemoryStore::new());
        let service = DirectoryService::new(registry.clone(), store.clone(), 300);
        (service, registry, store)
    }

    #[tokio::test]
    async fn resolves_known_iban_and_populates_cache() {
        let (service, _, store) = service_with("PBUAUA2X", DirectoryStatus::Active).await;

        let resolved = service.resolve_by_iban(IBAN).await.unwrap().unwrap();
        assert_eq!(resolved.bic, "PBUAUA2X");

        let cached = store.get("directory:iban:UA7430").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn unknown_prefix_resolves_to_none() {
        let registry = Arc::new(InMemoryRegistry::new());
        let store = Arc::new(InMemoryStore::new());
        let service = DirectoryService::new(registry, store, 300);

        assert!(service.resolve_by_iban(IBAN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_entries_are_still_resolvable() {
        let (service, _, _) = service_with("PBUAUA2X", DirectoryStatus::Maintenance).await;

        let resolved = service.resolve_by_iban(IBAN).await.unwrap().unwrap();
        assert_eq!(resolved.status, DirectoryStatus::Maintenance);
    }

    #[tokio::test]
    async fn read_after_invalidate_never_returns_stale_entry() {
        let (service, _, _) = service_with("PBUAUA2X", DirectoryStatus::Active).await;

        let before = service.resolve_by_iban(IBAN).await.unwrap().unwrap();
        assert_eq!(before.status, DirectoryStatus::Active);

        service
            .update_status("PBUAUA2X", DirectoryStatus::Inactive)
            .await
            .unwrap();

        let after = service.resolve_by_iban(IBAN).await.unwrap().unwrap();
        assert_eq!(after.status, DirectoryStatus::Inactive);
    }

    #[tokio::test]
    async fn cached_value_served_without_registry_change() {
        let (service, registry, _) = service_with("PBUAUA2X", DirectoryStatus::Active).await;

        let first = service.resolve_by_iban(IBAN).await.unwrap().unwrap();

        // Mutate the registry without invalidating: bounded staleness means
        // the cached copy is still served.
        registry
            .update_status("PBUAUA2X", DirectoryStatus::Inactive)
            .await
            .unwrap();

        let second = service.resolve_by_iban(IBAN).await.unwrap().unwrap();
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn rate_limit_override_comes_from_directory() {
        let (service, _, _) = service_with("PBUAUA2X", DirectoryStatus::Active).await;

        assert_eq!(service.rate_limit_for("PBUAUA2X").await.unwrap(), Some(50));
        assert_eq!(service.rate_limit_for("NOPEUA2X").await.unwrap(), None);
    }
}
