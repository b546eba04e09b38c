//! Read-through listing and write-invalidate mutations over the query engine.

use bytes::Bytes;
use futures::try_join;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{EventPublisher, NoopPublisher};
use super::storage::{ByteStream, Storage};
use super::tag_service::TagService;
use super::validation::{DefaultValidator, Validator};
use crate::cache::ImageCache;
use crate::db::ImageStore;
use crate::error::{CatalogError, Result};
use crate::models::{
    extension_for, CatalogStats, CreateImageRequest, Image, ListImagesRequest, Metadata, NewImage,
    Tag, UpdateImageRequest, SUPPORTED_CONTENT_TYPES,
};
use crate::query::{ImageListResponse, NormalizedListRequest, QueryEngine};

const CATALOG_STATS_KEY: &str = "catalog";
const MAX_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct ListingService {
    engine: QueryEngine,
    images: Arc<dyn ImageStore>,
    tags: Arc<TagService>,
    cache: Arc<ImageCache>,
    storage: Arc<dyn Storage>,
    validator: Arc<dyn Validator>,
    publisher: Arc<dyn EventPublisher>,
}

impl ListingService {
    pub fn new(
        engine: QueryEngine,
        images: Arc<dyn ImageStore>,
        tags: Arc<TagService>,
        cache: Arc<ImageCache>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            engine,
            images,
            tags,
            cache,
            storage,
            validator: Arc::new(DefaultValidator),
            publisher: Arc::new(NoopPublisher),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub async fn get_image(&self, id: i64) -> Result<Image> {
        match self.cache.get_image(id).await {
            Ok(Some(image)) => {
                debug!(image_id = id, "Image served from cache");
                return Ok(image);
            }
            Ok(None) => {}
            Err(e) => debug!(image_id = id, error = %e, "Image cache unavailable; reading store"),
        }
        let image = self.engine.get_by_id(id).await?;
        self.cache.set_image(&image, Duration::ZERO).await?;
        Ok(image)
    }

    pub async fn list_images(&self, request: &ListImagesRequest) -> Result<ImageListResponse> {
        let normalized = NormalizedListRequest::from_request(request)?;
        let fingerprint = ImageCache::fingerprint(&normalized);
        match self.cache.get_list(&fingerprint).await {
            Ok(Some(response)) => {
                debug!(%fingerprint, "Image list served from cache");
                return Ok(response);
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "List cache unavailable; querying store"),
        }

        let pagination = normalized.pagination;
        let sort = normalized.sort;
        let (images, total_count) = match &normalized.filter {
            Some(filter) => self.engine.get_by_filter(filter, pagination, sort).await?,
            None => try_join!(
                self.engine.list_with_tags(pagination, sort),
                self.engine.count()
            )?,
        };
        let response =
            ImageListResponse::new(images, total_count, pagination.page, pagination.page_size);
        self.cache.set_list(&fingerprint, &response, Duration::ZERO).await?;
        Ok(response)
    }

    /// Validates and stores a new image with its tags.
    ///
    /// Nothing is left behind on failure: a row whose tags could not be attached is
    /// deleted again, and the stored file is removed.
    pub async fn create_image(&self, request: CreateImageRequest, data: Bytes) -> Result<Image> {
        self.validator.validate_upload(&request)?;
        let metadata = request.metadata.as_deref().map(Metadata::parse).transpose()?;

        let filename = format!("{}.{}", Uuid::new_v4(), extension_for(&request.content_type));
        let storage_path = self
            .storage
            .store(&filename, &request.content_type, data, request.file_size)
            .await?;

        let new_image = NewImage {
            filename,
            original_filename: request.original_filename.clone(),
            content_type: request.content_type.clone(),
            file_size: request.file_size,
            storage_path: storage_path.clone(),
            thumbnail_path: None,
            width: request.width,
            height: request.height,
            metadata,
            uploaded_at: chrono::Utc::now(),
        };
        let image = match self.insert_with_tags(new_image, &request.tags).await {
            Ok(image) => image,
            Err(e) => {
                self.discard_file(&storage_path).await;
                return Err(e);
            }
        };

        self.invalidate(image.id).await?;
        info!(image_id = image.id, filename = %image.filename, tags = ?image.tag_names(), "Image created");
        if let Err(e) = self.publisher.on_image_created(&image).await {
            warn!(image_id = image.id, error = %e, "Failed to publish image created event");
        }
        Ok(image)
    }

    async fn insert_with_tags(&self, new_image: NewImage, raw_tags: &[String]) -> Result<Image> {
        let tags = self.tags.resolve_tags(raw_tags).await?;
        let mut image = self.images.insert_image(new_image).await?;
        if let Err(e) = self.tags.assign_tags(image.id, &tags).await {
            error!(image_id = image.id, error = %e, "Tag assignment failed; removing image row");
            if let Err(cleanup) = self.images.delete_image(image.id).await {
                error!(image_id = image.id, error = %cleanup, "Failed to remove orphaned image row");
            }
            return Err(e);
        }
        image.set_tags(tags);
        Ok(image)
    }

    /// Replaces the tag set of an image.
    pub async fn update_image(&self, id: i64, request: UpdateImageRequest) -> Result<Image> {
        self.validator.validate_update(id, &request)?;
        let mut image = self.engine.get_by_id(id).await?;
        let tags: Vec<Tag> = self.tags.resolve_tags(&request.tags).await?;
        image.set_tags(tags.clone());
        self.validator.validate_image(&image)?;

        let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        let mut updated = self.images.update_image(&image, &tag_ids).await?;
        updated.set_tags(tags);

        self.invalidate(id).await?;
        info!(image_id = id, tags = ?updated.tag_names(), "Image updated");
        if let Err(e) = self.publisher.on_image_updated(&updated).await {
            warn!(image_id = id, error = %e, "Failed to publish image updated event");
        }
        Ok(updated)
    }

    pub async fn delete_image(&self, id: i64) -> Result<()> {
        self.validator.validate_deletion(id)?;
        let image = self.engine.get_by_id(id).await?;
        self.images.delete_image(id).await?;
        self.discard_file(&image.storage_path).await;

        self.invalidate(id).await?;
        info!(image_id = id, "Image deleted");
        if let Err(e) = self.publisher.on_image_deleted(&image).await {
            warn!(image_id = id, error = %e, "Failed to publish image deleted event");
        }
        Ok(())
    }

    /// Catalog-wide counters, cached under the stat TTL. Mutations do not refresh them.
    pub async fn stats(&self) -> Result<CatalogStats> {
        match self.cache.get_stat::<CatalogStats>(CATALOG_STATS_KEY).await {
            Ok(Some(stats)) => return Ok(stats),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Stat cache unavailable; computing stats"),
        }

        let (total_images, total_tags) = try_join!(self.engine.count(), self.tags.count())?;
        let mut images_by_content_type = BTreeMap::new();
        for content_type in SUPPORTED_CONTENT_TYPES {
            let count = self.engine.count_by_content_type(content_type).await?;
            images_by_content_type.insert(content_type.to_string(), count);
        }
        let stats = CatalogStats {
            total_images,
            images_by_content_type,
            total_tags,
        };
        self.cache.set_stat(CATALOG_STATS_KEY, &stats, Duration::ZERO).await?;
        Ok(stats)
    }

    pub async fn image_url(&self, id: i64, expiry: Duration) -> Result<String> {
        if expiry.is_zero() || expiry > MAX_URL_EXPIRY {
            return Err(CatalogError::validation(format!(
                "url expiry must be between 1 second and {} seconds",
                MAX_URL_EXPIRY.as_secs()
            )));
        }
        let image = self.get_image(id).await?;
        self.storage.generate_url(&image.storage_path, expiry).await
    }

    /// The image record and a stream over its stored bytes.
    pub async fn open_image_file(&self, id: i64) -> Result<(Image, ByteStream)> {
        let image = self.get_image(id).await?;
        let stream = self.storage.retrieve(&image.storage_path).await?;
        Ok((image, stream))
    }

    async fn invalidate(&self, id: i64) -> Result<()> {
        self.cache.delete_image(id).await?;
        self.cache.invalidate_all_lists().await
    }

    async fn discard_file(&self, path: &str) {
        if let Err(e) = self.storage.delete(path).await {
            warn!(path, error = %e, "Failed to delete stored file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MemoryCache};
    use crate::db::{ImageStore, MemoryCatalogStore, TagStore};
    use crate::services::storage::MemoryStorage;
    use crate::test_support::{seed_image, strings};
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct Harness {
        store: Arc<MemoryCatalogStore>,
        backend: Arc<MemoryCache>,
        cache: Arc<ImageCache>,
        storage: Arc<MemoryStorage>,
        service: ListingService,
    }

    fn harness_with(cache_backend: Option<Arc<MemoryCache>>) -> Harness {
        let store = Arc::new(MemoryCatalogStore::new());
        let backend = cache_backend.clone().unwrap_or_default();
        let cache = Arc::new(match cache_backend {
            Some(b) => ImageCache::new(b, CacheSettings::default()),
            None => ImageCache::disabled(),
        });
        let storage = Arc::new(MemoryStorage::new());
        let engine = QueryEngine::new(store.clone(), store.clone());
        let tags = Arc::new(TagService::new(store.clone(), cache.clone()));
        let service = ListingService::new(engine, store.clone(), tags, cache.clone(), storage.clone());
        Harness {
            store,
            backend,
            cache,
            storage,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(Some(Arc::new(MemoryCache::new())))
    }

    fn upload(tags: &[&str]) -> (CreateImageRequest, Bytes) {
        let data = Bytes::from_static(b"\x89PNG fake image bytes");
        let request = CreateImageRequest {
            original_filename: "holiday.png".to_string(),
            content_type: "image/png".to_string(),
            file_size: data.len() as i64,
            width: Some(320),
            height: Some(200),
            tags: strings(tags),
            metadata: Some(r#"{"camera":"x100"}"#.to_string()),
        };
        (request, data)
    }

    #[tokio::test]
    async fn test_create_image_round_trips_sorted_tags() {
        let h = harness();
        let (request, data) = upload(&["Urban", "nature"]);
        let created = h.service.create_image(request, data).await.unwrap();
        assert_eq!(created.tag_names(), vec!["nature", "urban"]);
        assert!(created.filename.ends_with(".png"));
        assert_eq!(h.storage.len(), 1);

        let fetched = h.service.get_image(created.id).await.unwrap();
        assert_eq!(fetched.tag_names(), vec!["nature", "urban"]);
        assert_eq!(fetched.metadata.unwrap().as_str(), r#"{"camera":"x100"}"#);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_tags_without_side_effects() {
        let h = harness();
        let (request, data) = upload(&["Nature", "Sunset", "sunset"]);
        let result = h.service.create_image(request, data).await;
        assert!(matches!(result, Err(CatalogError::Duplicate(_))));
        assert_eq!(h.store.image_count().await, 0);
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_failed_tag_assignment_removes_row_and_file() {
        let h = harness();
        h.store.fail_tag_assignment(true);
        let (request, data) = upload(&["nature"]);
        let result = h.service.create_image(request, data).await;
        assert!(matches!(result, Err(CatalogError::Internal(_))));
        assert_eq!(h.store.image_count().await, 0);
        assert!(h.storage.is_empty());
    }

    #[tokio::test]
    async fn test_cached_image_is_served_without_store_call() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &["nature"]).await;
        h.cache.set_image(&image, Duration::ZERO).await.unwrap();

        let fetched = h.service.get_image(image.id).await.unwrap();
        assert_eq!(fetched, image);
        assert_eq!(h.store.calls().find_image, 0);
    }

    #[tokio::test]
    async fn test_get_image_populates_cache_on_miss() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &["nature"]).await;
        h.service.get_image(image.id).await.unwrap();
        h.service.get_image(image.id).await.unwrap();
        assert_eq!(h.store.calls().find_image, 1);
        assert!(h.backend.contains_key(&format!("image-catalog:image:{}", image.id)));
    }

    #[tokio::test]
    async fn test_update_is_never_hidden_by_stale_cache() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &["nature"]).await;
        h.service.get_image(image.id).await.unwrap();

        let request = UpdateImageRequest { tags: strings(&["urban", "art"]) };
        let updated = h.service.update_image(image.id, request).await.unwrap();
        assert_eq!(updated.tag_names(), vec!["art", "urban"]);

        let fetched = h.service.get_image(image.id).await.unwrap();
        assert_eq!(fetched.tag_names(), vec!["art", "urban"]);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_tags_and_cache_untouched() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &["nature"]).await;
        h.service.get_image(image.id).await.unwrap();
        let before = h.store.tag_ids_of(image.id).await;

        h.store.fail_image_update(true);
        let request = UpdateImageRequest { tags: strings(&["urban"]) };
        let result = h.service.update_image(image.id, request).await;
        assert!(matches!(result, Err(CatalogError::Internal(_))));

        assert_eq!(h.store.tag_ids_of(image.id).await, before);
        let stored = h.store.find_image(image.id).await.unwrap();
        assert_eq!(stored.updated_at, image.updated_at);
        let fetched = h.service.get_image(image.id).await.unwrap();
        assert_eq!(fetched.tag_names(), vec!["nature"]);
    }

    #[tokio::test]
    async fn test_update_missing_image_is_not_found() {
        let h = harness();
        let request = UpdateImageRequest { tags: strings(&["nature"]) };
        let result = h.service.update_image(42, request).await;
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_is_cached_and_invalidated_by_mutations() {
        let h = harness();
        seed_image(&h.store, "a.jpg", &["nature"]).await;
        let request = ListImagesRequest::default();

        let first = h.service.list_images(&request).await.unwrap();
        let again = h.service.list_images(&request).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(h.store.calls().list_images, 1);

        let (upload_request, data) = upload(&["nature"]);
        h.service.create_image(upload_request, data).await.unwrap();
        let after = h.service.list_images(&request).await.unwrap();
        assert_eq!(after.total_count, 2);
        assert_eq!(h.store.calls().list_images, 2);
    }

    #[tokio::test]
    async fn test_tag_filtered_listing() {
        let h = harness();
        let a = seed_image(&h.store, "a.jpg", &["nature", "urban"]).await;
        let b = seed_image(&h.store, "b.jpg", &["nature"]).await;

        let all = h
            .service
            .list_images(&ListImagesRequest {
                tags: strings(&["nature", "urban"]),
                match_all: true,
                ..ListImagesRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(all.images.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a.id]);
        assert_eq!(all.total_count, 1);

        let any = h
            .service
            .list_images(&ListImagesRequest {
                tags: strings(&["nature", "urban"]),
                sort_by: Some("filename".to_string()),
                sort_order: Some("asc".to_string()),
                ..ListImagesRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(any.images.iter().map(|i| i.id).collect::<Vec<_>>(), vec![a.id, b.id]);
        assert_eq!(any.images[0].tag_names(), vec!["nature", "urban"]);
    }

    #[tokio::test]
    async fn test_pagination_metadata_over_many_images() {
        let h = harness();
        for i in 0..105 {
            seed_image(&h.store, &format!("img-{i:03}.jpg"), &[]).await;
        }
        let last = h
            .service
            .list_images(&ListImagesRequest {
                page: 6,
                page_size: 20,
                ..ListImagesRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(last.total_pages, 6);
        assert_eq!(last.images.len(), 5);
        assert!(!last.has_next_page);
        assert!(last.has_prev_page);
    }

    #[tokio::test]
    async fn test_page_far_beyond_the_end_is_empty() {
        let h = harness();
        seed_image(&h.store, "a.jpg", &["nature"]).await;
        for tags in [vec![], strings(&["nature"])] {
            let response = h
                .service
                .list_images(&ListImagesRequest {
                    page: i64::MAX,
                    tags,
                    ..ListImagesRequest::default()
                })
                .await
                .unwrap();
            assert!(response.images.is_empty());
            assert_eq!(response.total_count, 1);
            assert_eq!(response.page, i64::MAX);
            assert!(!response.has_next_page);
        }
    }

    #[tokio::test]
    async fn test_without_cache_every_read_hits_store() {
        let h = harness_with(None);
        let image = seed_image(&h.store, "a.jpg", &[]).await;
        h.service.get_image(image.id).await.unwrap();
        h.service.get_image(image.id).await.unwrap();
        assert_eq!(h.store.calls().find_image, 2);

        let (request, data) = upload(&["nature"]);
        assert!(h.service.create_image(request, data).await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_cache_falls_back_to_store() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &[]).await;
        h.backend.set_offline(true);
        assert_eq!(h.service.get_image(image.id).await.unwrap().id, image.id);
        let listing = h.service.list_images(&ListImagesRequest::default()).await.unwrap();
        assert_eq!(listing.total_count, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_row_file_and_cache_entry() {
        let h = harness();
        let (request, data) = upload(&["nature"]);
        let image = h.service.create_image(request, data).await.unwrap();
        h.service.get_image(image.id).await.unwrap();

        h.service.delete_image(image.id).await.unwrap();
        assert!(h.storage.is_empty());
        assert!(matches!(h.service.get_image(image.id).await, Err(CatalogError::NotFound(_))));
        assert!(matches!(h.service.delete_image(image.id).await, Err(CatalogError::NotFound(_))));
        // The tag itself survives its last image.
        assert!(h.store.find_tag_by_name("nature").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_succeeds_when_file_removal_fails() {
        let h = harness();
        let (request, data) = upload(&[]);
        let image = h.service.create_image(request, data).await.unwrap();
        h.storage.fail_deletes(true);
        h.service.delete_image(image.id).await.unwrap();
        assert_eq!(h.store.image_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats_are_read_through() {
        let h = harness();
        seed_image(&h.store, "a.jpg", &["nature"]).await;
        let (request, data) = upload(&["urban"]);
        h.service.create_image(request, data).await.unwrap();

        let stats = h.service.stats().await.unwrap();
        assert_eq!(stats.total_images, 2);
        assert_eq!(stats.total_tags, 2);
        assert_eq!(stats.images_by_content_type["image/jpeg"], 1);
        assert_eq!(stats.images_by_content_type["image/png"], 1);

        // Served from cache until the stat TTL runs out.
        seed_image(&h.store, "c.jpg", &[]).await;
        assert_eq!(h.service.stats().await.unwrap().total_images, 2);
    }

    #[tokio::test]
    async fn test_image_url() {
        let h = harness();
        let (request, data) = upload(&[]);
        let image = h.service.create_image(request, data).await.unwrap();
        let url = h.service.image_url(image.id, Duration::from_secs(600)).await.unwrap();
        assert!(url.contains(&image.storage_path));
        assert!(matches!(
            h.service.image_url(image.id, Duration::ZERO).await,
            Err(CatalogError::Validation(_))
        ));
    }

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<(&'static str, i64)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn on_image_created(&self, image: &Image) -> Result<()> {
            self.events.lock().await.push(("created", image.id));
            Ok(())
        }
        async fn on_image_updated(&self, image: &Image) -> Result<()> {
            self.events.lock().await.push(("updated", image.id));
            Err(CatalogError::Internal("subscriber down".to_string()))
        }
        async fn on_image_deleted(&self, image: &Image) -> Result<()> {
            self.events.lock().await.push(("deleted", image.id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_are_published_and_failures_ignored() {
        let h = harness();
        let publisher = Arc::new(RecordingPublisher::default());
        let service = h.service.with_publisher(publisher.clone());

        let (request, data) = upload(&["nature"]);
        let image = service.create_image(request, data).await.unwrap();
        service
            .update_image(image.id, UpdateImageRequest { tags: strings(&["art"]) })
            .await
            .unwrap();
        service.delete_image(image.id).await.unwrap();

        let events = publisher.events.lock().await.clone();
        assert_eq!(
            events,
            vec![("created", image.id), ("updated", image.id), ("deleted", image.id)]
        );
    }

    struct LockedImages(i64);

    impl Validator for LockedImages {
        fn validate_upload(&self, request: &CreateImageRequest) -> Result<()> {
            DefaultValidator.validate_upload(request)
        }
        fn validate_update(&self, id: i64, request: &UpdateImageRequest) -> Result<()> {
            DefaultValidator.validate_update(id, request)
        }
        fn validate_deletion(&self, id: i64) -> Result<()> {
            if id == self.0 {
                return Err(CatalogError::Validation(format!("image {id} is locked")));
            }
            DefaultValidator.validate_deletion(id)
        }
    }

    #[tokio::test]
    async fn test_custom_validator_blocks_deletion() {
        let h = harness();
        let image = seed_image(&h.store, "a.jpg", &["nature"]).await;
        let service = h.service.with_validator(Arc::new(LockedImages(image.id)));

        let result = service.delete_image(image.id).await;
        assert!(matches!(result, Err(CatalogError::Validation(_))));
        assert_eq!(service.get_image(image.id).await.unwrap().id, image.id);
    }
}
