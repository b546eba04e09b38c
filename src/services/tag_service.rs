use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::ImageCache;
use crate::db::TagStore;
use crate::error::{CatalogError, Result};
use crate::models::{
    normalize_tag_name, normalize_tag_names, NewTag, PredefinedTag, Tag, TagWithCount,
};

const GET_OR_CREATE_ATTEMPTS: usize = 3;
const MAX_POPULAR_LIMIT: u64 = 100;

pub struct TagService {
    tags: Arc<dyn TagStore>,
    cache: Arc<ImageCache>,
}

impl TagService {
    pub fn new(tags: Arc<dyn TagStore>, cache: Arc<ImageCache>) -> Self {
        Self { tags, cache }
    }

    /// Returns the tag named `name`, creating it when absent.
    ///
    /// A concurrent insert of the same name loses on the unique constraint; the loser
    /// re-reads the winner's row.
    pub async fn get_or_create(&self, name: &str) -> Result<Tag> {
        let name = normalize_tag_name(name)?;
        for attempt in 1..=GET_OR_CREATE_ATTEMPTS {
            if let Some(tag) = self.tags.find_tag_by_name(&name).await? {
                return Ok(tag);
            }
            let new_tag = NewTag {
                name: name.clone(),
                ..NewTag::default()
            };
            match self.tags.insert_tag(new_tag).await {
                Ok(tag) => {
                    debug!(tag_id = tag.id, name = %tag.name, "Created tag");
                    return Ok(tag);
                }
                Err(CatalogError::Duplicate(_)) => {
                    debug!(name = %name, attempt, "Tag was created concurrently; re-fetching");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CatalogError::Internal(format!(
            "could not resolve tag '{name}' after {GET_OR_CREATE_ATTEMPTS} attempts"
        )))
    }

    /// Normalizes `raw` as one image's tag set and resolves every name to a stored tag.
    pub async fn resolve_tags(&self, raw: &[String]) -> Result<Vec<Tag>> {
        let names = normalize_tag_names(raw)?;
        let mut tags = Vec::with_capacity(names.len());
        for name in &names {
            tags.push(self.get_or_create(name).await?);
        }
        Ok(tags)
    }

    pub async fn assign_tags(&self, image_id: i64, tags: &[Tag]) -> Result<()> {
        let ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
        self.tags.replace_image_tags(image_id, &ids).await
    }

    pub async fn list_tags(&self) -> Result<Vec<TagWithCount>> {
        self.tags.list_tags_with_counts().await
    }

    pub async fn popular_tags(&self, limit: u64) -> Result<Vec<TagWithCount>> {
        self.tags.popular_tags(limit.clamp(1, MAX_POPULAR_LIMIT)).await
    }

    pub async fn list_predefined(&self) -> Result<Vec<Tag>> {
        self.tags.list_predefined_tags().await
    }

    pub async fn count(&self) -> Result<i64> {
        self.tags.count_tags().await
    }

    /// Inserts the curated tags that do not exist yet. Existing names are left as they
    /// are. Returns how many tags were inserted.
    pub async fn seed_predefined(&self, definitions: &[PredefinedTag]) -> Result<usize> {
        let mut inserted = 0;
        for definition in definitions {
            let name = normalize_tag_name(&definition.name)?;
            if self.tags.find_tag_by_name(&name).await?.is_some() {
                continue;
            }
            let new_tag = NewTag {
                name,
                description: definition.description.clone(),
                color: definition.color.clone(),
                is_predefined: true,
                category: definition.category.clone(),
                display_order: definition.display_order,
            };
            match self.tags.insert_tag(new_tag).await {
                Ok(_) => inserted += 1,
                Err(CatalogError::Duplicate(msg)) => {
                    warn!(tag = %definition.name, %msg, "Predefined tag appeared concurrently; skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if inserted > 0 {
            info!(inserted, "Seeded predefined tags.");
        }
        Ok(inserted)
    }

    /// Deletes a tag and its associations. Cached lists are dropped; cached single
    /// images still naming the tag expire by TTL.
    pub async fn delete_tag(&self, id: i64) -> Result<()> {
        let tag = self.tags.find_tag(id).await?;
        self.tags.delete_tag(id).await?;
        self.cache.invalidate_all_lists().await?;
        info!(tag_id = id, name = %tag.name, "Deleted tag");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MemoryCache};
    use crate::db::MemoryCatalogStore;
    use crate::query::ImageListResponse;
    use crate::test_support::{seed_image, strings};
    use std::time::Duration;

    fn service(store: &Arc<MemoryCatalogStore>) -> TagService {
        TagService::new(store.clone(), Arc::new(ImageCache::disabled()))
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_existing_tag() {
        let store = Arc::new(MemoryCatalogStore::new());
        let service = service(&store);
        let first = service.get_or_create("  Nature ").await.unwrap();
        let second = service.get_or_create("nature").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "nature");
        assert_eq!(service.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_insert_is_resolved_by_refetch() {
        let store = Arc::new(MemoryCatalogStore::new());
        store.race_next_tag_insert("sunset").await;
        let tag = service(&store).get_or_create("sunset").await.unwrap();
        assert_eq!(tag.name, "sunset");
        assert_eq!(store.count_tags().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_tags_keeps_request_order_and_rejects_collisions() {
        let store = Arc::new(MemoryCatalogStore::new());
        let service = service(&store);
        let tags = service.resolve_tags(&strings(&["Urban", "nature"])).await.unwrap();
        assert_eq!(tags.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["urban", "nature"]);

        let duplicate = service.resolve_tags(&strings(&["Nature", "Sunset", "sunset"])).await;
        assert!(matches!(duplicate, Err(CatalogError::Duplicate(_))));
        // Nothing of the rejected set was created.
        assert!(store.find_tag_by_name("sunset").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_seed_predefined_is_idempotent() {
        let store = Arc::new(MemoryCatalogStore::new());
        let service = service(&store);
        service.get_or_create("nature").await.unwrap();
        let definitions = vec![
            PredefinedTag {
                name: "Nature".to_string(),
                description: Some("Outdoors".to_string()),
                color: None,
                category: Some("scene".to_string()),
                display_order: Some(1),
            },
            PredefinedTag {
                name: "portrait".to_string(),
                description: None,
                color: Some("#ff8800".to_string()),
                category: Some("people".to_string()),
                display_order: Some(1),
            },
        ];
        assert_eq!(service.seed_predefined(&definitions).await.unwrap(), 1);
        assert_eq!(service.seed_predefined(&definitions).await.unwrap(), 0);

        let predefined = service.list_predefined().await.unwrap();
        assert_eq!(predefined.len(), 1);
        assert_eq!(predefined[0].name, "portrait");
        assert!(predefined[0].is_predefined);
    }

    #[tokio::test]
    async fn test_popular_tags_ordered_by_usage() {
        let store = Arc::new(MemoryCatalogStore::new());
        seed_image(&store, "a.jpg", &["nature", "urban"]).await;
        seed_image(&store, "b.jpg", &["nature"]).await;
        seed_image(&store, "c.jpg", &["art"]).await;
        let popular = service(&store).popular_tags(2).await.unwrap();
        let summary: Vec<(&str, i64)> = popular
            .iter()
            .map(|t| (t.tag.name.as_str(), t.image_count))
            .collect();
        assert_eq!(summary, vec![("nature", 2), ("art", 1)]);
    }

    #[tokio::test]
    async fn test_delete_tag_drops_associations_and_lists() {
        let store = Arc::new(MemoryCatalogStore::new());
        let image = seed_image(&store, "a.jpg", &["nature", "urban"]).await;
        let backend = Arc::new(MemoryCache::new());
        let cache = Arc::new(ImageCache::new(backend.clone(), CacheSettings::default()));
        let response = ImageListResponse::new(vec![image.clone()], 1, 1, 20);
        cache.set_list("fp", &response, Duration::ZERO).await.unwrap();

        let service = TagService::new(store.clone(), cache.clone());
        let urban = store.find_tag_by_name("urban").await.unwrap().unwrap();
        service.delete_tag(urban.id).await.unwrap();

        assert_eq!(store.tag_ids_of(image.id).await.len(), 1);
        assert_eq!(cache.get_list("fp").await.unwrap(), None);
        assert!(matches!(service.delete_tag(urban.id).await, Err(CatalogError::NotFound(_))));
    }
}
