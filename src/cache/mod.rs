//! Best-effort cache in front of the query engine.
//!
//! The cache never holds authority: reads may report `CacheUnavailable`, writes and
//! deletes always succeed from the caller's point of view, and every backend call is
//! bounded by `operation_timeout`.

pub mod backend;
pub mod memory;
pub mod redis;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use backend::{CacheBackend, NoopCache};
pub use memory::MemoryCache;
pub use self::redis::RedisCache;

use crate::error::{CatalogError, Result};
use crate::models::Image;
use crate::query::{ImageListResponse, NormalizedListRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub prefix: String,
    pub image_ttl: Duration,
    pub list_ttl: Duration,
    pub stat_ttl: Duration,
    pub operation_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            prefix: "image-catalog".to_string(),
            image_ttl: Duration::from_secs(24 * 60 * 60),
            list_ttl: Duration::from_secs(15 * 60),
            stat_ttl: Duration::from_secs(5 * 60),
            operation_timeout: Duration::from_millis(250),
        }
    }
}

pub struct ImageCache {
    backend: Arc<dyn CacheBackend>,
    settings: CacheSettings,
}

fn effective_ttl(ttl: Duration, default: Duration) -> Duration {
    if ttl.is_zero() {
        default
    } else {
        ttl
    }
}

impl ImageCache {
    pub fn new(backend: Arc<dyn CacheBackend>, settings: CacheSettings) -> Self {
        Self { backend, settings }
    }

    /// A cache with no backend: reads are unavailable, writes are no-ops.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopCache), CacheSettings::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_configured()
    }

    /// Canonical cache key for a normalized listing request.
    ///
    /// Tag names are already sorted and de-duplicated, so logically identical requests
    /// hash to the same key. The match flag only takes part when a filter is present.
    pub fn fingerprint(request: &NormalizedListRequest) -> String {
        let (tags, match_all) = match &request.filter {
            Some(filter) => (filter.names().join(","), filter.match_all()),
            None => (String::new(), false),
        };
        let canonical = format!(
            "page={};page_size={};sort={};match_all={};tags={}",
            request.pagination.page, request.pagination.page_size, request.sort, match_all, tags
        );
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    fn image_key(&self, id: i64) -> String {
        format!("{}:image:{id}", self.settings.prefix)
    }

    fn list_generation_key(&self) -> String {
        format!("{}:list-generation", self.settings.prefix)
    }

    fn list_key(&self, generation: i64, fingerprint: &str) -> String {
        format!("{}:list:{generation}:{fingerprint}", self.settings.prefix)
    }

    /// Current list generation. Listings cached under an older generation are never read
    /// again and expire by TTL.
    async fn list_generation(&self) -> Result<i64> {
        Ok(self.read::<i64>(&self.list_generation_key()).await?.unwrap_or(0))
    }

    fn stat_key(&self, key: &str) -> String {
        format!("{}:stat:{key}", self.settings.prefix)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match timeout(self.settings.operation_timeout, self.backend.get(key)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CatalogError::CacheUnavailable(format!(
                    "read of '{key}' timed out"
                )))
            }
        };
        let Some(text) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry.");
                Ok(None)
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        if !self.backend.is_configured() {
            return Ok(());
        }
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache entry; skipping.");
                return Ok(());
            }
        };
        match timeout(self.settings.operation_timeout, self.backend.set(key, payload, ttl)).await {
            Ok(Ok(())) => debug!(key, ttl_secs = ttl.as_secs(), "Cached entry"),
            Ok(Err(e)) => warn!(key, error = %e, "Cache write failed; ignoring."),
            Err(_) => warn!(key, "Cache write timed out; ignoring."),
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if !self.backend.is_configured() {
            return Ok(());
        }
        match timeout(self.settings.operation_timeout, self.backend.delete(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(key, error = %e, "Cache delete failed; entry will expire by TTL."),
            Err(_) => warn!(key, "Cache delete timed out; entry will expire by TTL."),
        }
        Ok(())
    }

    pub async fn get_image(&self, id: i64) -> Result<Option<Image>> {
        self.read(&self.image_key(id)).await
    }

    /// A zero `ttl` uses the configured image TTL.
    pub async fn set_image(&self, image: &Image, ttl: Duration) -> Result<()> {
        let ttl = effective_ttl(ttl, self.settings.image_ttl);
        self.write(&self.image_key(image.id), image, ttl).await
    }

    pub async fn delete_image(&self, id: i64) -> Result<()> {
        self.remove(&self.image_key(id)).await
    }

    pub async fn get_list(&self, fingerprint: &str) -> Result<Option<ImageListResponse>> {
        let generation = self.list_generation().await?;
        self.read(&self.list_key(generation, fingerprint)).await
    }

    /// A zero `ttl` uses the configured list TTL.
    pub async fn set_list(&self, fingerprint: &str, response: &ImageListResponse, ttl: Duration) -> Result<()> {
        if !self.backend.is_configured() {
            return Ok(());
        }
        let generation = match self.list_generation().await {
            Ok(generation) => generation,
            Err(e) => {
                warn!(error = %e, "List generation unavailable; not caching list.");
                return Ok(());
            }
        };
        let ttl = effective_ttl(ttl, self.settings.list_ttl);
        self.write(&self.list_key(generation, fingerprint), response, ttl).await
    }

    /// Drops every cached listing, whatever its fingerprint, with a single counter bump.
    pub async fn invalidate_all_lists(&self) -> Result<()> {
        if !self.backend.is_configured() {
            return Ok(());
        }
        let key = self.list_generation_key();
        match timeout(self.settings.operation_timeout, self.backend.increment(&key)).await {
            Ok(Ok(generation)) => debug!(generation, "Invalidated cached image lists"),
            Ok(Err(e)) => warn!(error = %e, "List invalidation failed; lists will expire by TTL."),
            Err(_) => warn!("List invalidation timed out; lists will expire by TTL."),
        }
        Ok(())
    }

    pub async fn get_stat<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.read(&self.stat_key(key)).await
    }

    /// A zero `ttl` uses the configured stat TTL.
    pub async fn set_stat<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let ttl = effective_ttl(ttl, self.settings.stat_ttl);
        self.write(&self.stat_key(key), value, ttl).await
    }
}
