//! Wiring of stores, cache and services into the shared application state.

use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{CacheBackend, ImageCache, NoopCache, RedisCache};
use crate::db::{ImageStore, TagStore};
use crate::query::QueryEngine;
use crate::server::config::CatalogConfig;
use crate::services::{EventPublisher, ListingService, Storage, TagService};
use crate::web::AppState;

/// Connects to Redis when a URL is configured. An unreachable Redis is not fatal: the
/// catalog then runs without a cache.
pub async fn connect_cache(config: &CatalogConfig) -> Arc<ImageCache> {
    let backend: Arc<dyn CacheBackend> = match config.redis_url.as_deref() {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!(error = %e, "Redis is unreachable; continuing without a cache");
                Arc::new(NoopCache)
            }
        },
        None => {
            info!("No redis_url configured; running without a cache.");
            Arc::new(NoopCache)
        }
    };
    Arc::new(ImageCache::new(backend, config.cache_settings()))
}

pub struct CatalogComponents {
    pub images: Arc<dyn ImageStore>,
    pub tags: Arc<dyn TagStore>,
    pub cache: Arc<ImageCache>,
    pub storage: Arc<dyn Storage>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub fn build_app_state(components: CatalogComponents) -> Arc<AppState> {
    let CatalogComponents {
        images,
        tags,
        cache,
        storage,
        publisher,
    } = components;

    let engine = QueryEngine::new(images.clone(), tags.clone());
    let tag_service = Arc::new(TagService::new(tags, cache.clone()));
    let listing = ListingService::new(engine, images, tag_service.clone(), cache, storage)
        .with_publisher(publisher);

    Arc::new(AppState {
        listing: Arc::new(listing),
        tags: tag_service,
    })
}
