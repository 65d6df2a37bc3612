//! Shared key-value store behind the directory cache and admission counters.
//!
//! Cross-request state is never a process-wide singleton: every component
//! receives a `SharedStore` handle. Production uses Redis; tests use the
//! in-memory stand-in. All operations are safe for many concurrent in-flight
//! requests and no lock is held across an I/O suspension point.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::Result;

/// Outcome of one fixed-window counter bump.
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    /// Counter value after this increment.
    pub count: u64,
    /// Seconds until the window resets.
    pub remaining_secs: u64,
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Delete every key matching the glob pattern. Returns the number of
    /// keys removed. The deletion is acknowledged by the shared store before
    /// this returns, so subsequent reads observe it.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Atomically increment a counter, arming the expiry on first increment.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<WindowCount>;

    async fn ping(&self) -> bool;
}

// =============================================================================
// REDIS-BACKED STORE
// =============================================================================

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub fn new(redis: ConnectionManager) -> Self {
        RedisStore { redis }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.redis.clone().get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let _: () = self.redis.clone().set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let keys: Vec<String> = conn.keys(pattern).await?;

        let count = keys.len() as u64;
        if !keys.is_empty() {
            let _: () = conn.del(&keys).await?;
        }

        info!(pattern, deleted = count, "cache keys invalidated");
        Ok(count)
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut conn = self.redis.clone();

        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            let _: () = conn.expire(key, window.as_secs().max(1) as i64).await?;
        }

        let ttl: i64 = conn.ttl(key).await?;
        let remaining_secs = if ttl > 0 {
            ttl as u64
        } else {
            window.as_secs().max(1)
        };

        Ok(WindowCount {
            count,
            remaining_secs,
        })
    }

    async fn ping(&self) -> bool {
        let result: std::result::Result<String, _> =
            redis::cmd("PING").query_async(&mut self.redis.clone()).await;
        result.is_ok()
    }
}

// =============================================================================
// IN-MEMORY STAND-IN (tests and local development)
// =============================================================================

#[derive(Default)]
struct InMemoryInner {
    values: HashMap<String, (String, Option<Instant>)>,
    counters: HashMap<String, (u64, Instant)>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Only the trailing-star form is used by the gateway.
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;

        if let Some((value, expires_at)) = inner.values.get(key) {
            if expires_at.map_or(true, |at| at > Instant::now()) {
                return Ok(Some(value.clone()));
            }
            inner.values.remove(key);
        }

        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.values.insert(
            key.to_string(),
            (
                value.to_string(),
                Some(Instant::now() + Duration::from_secs(ttl_secs)),
            ),
        );
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;

        let matching: Vec<String> = inner
            .values
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        for key in &matching {
            inner.values.remove(key);
        }

        Ok(matching.len() as u64)
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let entry = inner
            .counters
            .entry(key.to_string())
            .or_insert((0, now + window));

        if entry.1 <= now {
            *entry = (0, now + window);
        }

        entry.0 += 1;

        Ok(WindowCount {
            count: entry.0,
            remaining_secs: entry.1.saturating_duration_since(now).as_secs().max(1),
        })
    }

    async fn ping(&self) -> bool {
        true
    }
}
