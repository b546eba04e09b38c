use async_trait::async_trait;
use std::time::Duration;

use crate::error::{CatalogError, Result};

/// Raw key/value operations a cache backend must provide. Values are JSON text.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// `Ok(None)` on a miss. Backend failures are `CacheUnavailable`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically increments the integer stored at `key`, starting from 0, and returns
    /// the new value. Counters never expire.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// `false` when no backend is configured at all.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Stand-in used when no cache is configured: every read is unavailable, every write
/// succeeds without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheBackend for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(CatalogError::CacheUnavailable(
            "no cache backend configured".to_string(),
        ))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn increment(&self, _key: &str) -> Result<i64> {
        Ok(0)
    }

    fn is_configured(&self) -> bool {
        false
    }
}
