use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::backend::CacheBackend;
use crate::error::{CatalogError, Result};

// Value and expiry; counters carry no expiry.
type Entry = (String, Option<Instant>);

fn is_live(entry: &Entry, now: Instant) -> bool {
    entry.1.map_or(true, |expires_at| expires_at > now)
}

/// In-process cache with per-entry expiry. Useful for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    offline: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable backend: every call fails with `CacheUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| is_live(&entry, Instant::now()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CatalogError::CacheUnavailable(
                "memory cache is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if is_live(&entry, now) {
                return Ok(Some(entry.0.clone()));
            }
        }
        // Drop the expired entry, if any, after releasing the read guard.
        self.entries.remove_if(key, |_, entry| !is_live(entry, now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.check_online()?;
        self.entries
            .insert(key.to_string(), (value, Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.check_online()?;
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ("0".to_string(), None));
        let current = if is_live(&entry, now) {
            entry.0.parse::<i64>().map_err(|e| {
                CatalogError::Internal(format!("cache key '{key}' does not hold an integer: {e}"))
            })?
        } else {
            0
        };
        let next = current + 1;
        *entry = (next.to_string(), None);
        Ok(next)
    }
}
