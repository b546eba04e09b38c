//! In-process catalog store. Same contracts as the PostgreSQL store, including unique
//! names/filenames and cascading deletes, plus call counters and failure switches so
//! tests can observe how the upper layers use it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::{Mutex, RwLock};

use crate::db::store::{ImageStore, TagStore};
use crate::error::{CatalogError, Result};
use crate::models::{Image, NewImage, NewTag, Tag, TagWithCount};
use crate::query::{SortField, SortOptions, SortOrder, TagFilter};

#[derive(Default)]
struct MemoryState {
    images: BTreeMap<i64, Image>,
    tags: BTreeMap<i64, Tag>,
    // (image_id, tag_id) -> created_at
    image_tags: BTreeMap<(i64, i64), DateTime<Utc>>,
    next_image_id: i64,
    next_tag_id: i64,
}

impl MemoryState {
    fn tag_names_of(&self, image_id: i64) -> HashSet<&str> {
        self.image_tags
            .range((image_id, i64::MIN)..=(image_id, i64::MAX))
            .filter_map(|((_, tag_id), _)| self.tags.get(tag_id))
            .map(|t| t.name.as_str())
            .collect()
    }

    fn matches(&self, image_id: i64, filter: &TagFilter) -> bool {
        if filter.is_empty() {
            return false;
        }
        let names = self.tag_names_of(image_id);
        if filter.match_all() {
            filter.names().iter().all(|n| names.contains(n.as_str()))
        } else {
            filter.names().iter().any(|n| names.contains(n.as_str()))
        }
    }

    fn usage_count(&self, tag_id: i64) -> i64 {
        self.image_tags.keys().filter(|(_, t)| *t == tag_id).count() as i64
    }
}

/// Number of calls each read path has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub find_image: usize,
    pub list_images: usize,
    pub list_images_by_tags: usize,
    pub count_images: usize,
    pub count_images_by_tags: usize,
    pub tags_for_images: usize,
}

#[derive(Default)]
struct CallCounters {
    find_image: AtomicUsize,
    list_images: AtomicUsize,
    list_images_by_tags: AtomicUsize,
    count_images: AtomicUsize,
    count_images_by_tags: AtomicUsize,
    tags_for_images: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, AtomicOrdering::SeqCst);
}

#[derive(Default)]
pub struct MemoryCatalogStore {
    state: RwLock<MemoryState>,
    calls: CallCounters,
    fail_tag_assignment: AtomicBool,
    fail_image_update: AtomicBool,
    // Names another "writer" inserts right before our own insert of the same name.
    racing_tag_names: Mutex<HashSet<String>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> StoreCalls {
        let c = &self.calls;
        StoreCalls {
            find_image: c.find_image.load(AtomicOrdering::SeqCst),
            list_images: c.list_images.load(AtomicOrdering::SeqCst),
            list_images_by_tags: c.list_images_by_tags.load(AtomicOrdering::SeqCst),
            count_images: c.count_images.load(AtomicOrdering::SeqCst),
            count_images_by_tags: c.count_images_by_tags.load(AtomicOrdering::SeqCst),
            tags_for_images: c.tags_for_images.load(AtomicOrdering::SeqCst),
        }
    }

    /// Makes every subsequent `replace_image_tags` fail with an internal error.
    pub fn fail_tag_assignment(&self, fail: bool) {
        self.fail_tag_assignment.store(fail, AtomicOrdering::SeqCst);
    }

    /// Makes every subsequent `update_image` fail before it writes anything.
    pub fn fail_image_update(&self, fail: bool) {
        self.fail_image_update.store(fail, AtomicOrdering::SeqCst);
    }

    /// Simulates a concurrent writer: the next insert of `name` finds it already taken.
    pub async fn race_next_tag_insert(&self, name: &str) {
        self.racing_tag_names.lock().await.insert(name.to_string());
    }

    pub async fn image_count(&self) -> usize {
        self.state.read().await.images.len()
    }

    fn sorted_images<'a>(images: impl Iterator<Item = &'a Image>, sort: SortOptions) -> Vec<Image> {
        let mut rows: Vec<Image> = images.cloned().collect();
        rows.sort_by(|a, b| {
            let primary = match sort.field {
                SortField::UploadedAt => a.uploaded_at.cmp(&b.uploaded_at),
                SortField::Filename => a.filename.cmp(&b.filename),
                SortField::FileSize => a.file_size.cmp(&b.file_size),
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            };
            let primary = match sort.order {
                SortOrder::Asc => primary,
                SortOrder::Desc => primary.reverse(),
            };
            match primary {
                Ordering::Equal => a.id.cmp(&b.id),
                other => other,
            }
        });
        rows
    }

    fn page(rows: Vec<Image>, limit: u64, offset: u64) -> Vec<Image> {
        rows.into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    fn insert_tag_locked(state: &mut MemoryState, new_tag: NewTag) -> Result<Tag> {
        if state.tags.values().any(|t| t.name == new_tag.name) {
            return Err(CatalogError::Duplicate(format!(
                "tag name '{}' already exists",
                new_tag.name
            )));
        }
        state.next_tag_id += 1;
        let tag = Tag {
            id: state.next_tag_id,
            name: new_tag.name,
            description: new_tag.description,
            color: new_tag.color,
            created_at: Utc::now(),
            is_predefined: new_tag.is_predefined,
            category: new_tag.category,
            display_order: new_tag.display_order,
        };
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }
}

#[async_trait]
impl ImageStore for MemoryCatalogStore {
    async fn insert_image(&self, new_image: NewImage) -> Result<Image> {
        let mut state = self.state.write().await;
        if state
            .images
            .values()
            .any(|i| i.filename == new_image.filename || i.storage_path == new_image.storage_path)
        {
            return Err(CatalogError::Duplicate(format!(
                "image '{}' already exists",
                new_image.filename
            )));
        }
        state.next_image_id += 1;
        let now = Utc::now();
        let image = Image {
            id: state.next_image_id,
            filename: new_image.filename,
            original_filename: new_image.original_filename,
            content_type: new_image.content_type,
            file_size: new_image.file_size,
            storage_path: new_image.storage_path,
            thumbnail_path: new_image.thumbnail_path,
            width: new_image.width,
            height: new_image.height,
            uploaded_at: new_image.uploaded_at,
            metadata: new_image.metadata,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };
        state.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn find_image(&self, id: i64) -> Result<Image> {
        bump(&self.calls.find_image);
        self.state
            .read()
            .await
            .images
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("image {id}")))
    }

    async fn update_image(&self, image: &Image, tag_ids: &[i64]) -> Result<Image> {
        if self.fail_image_update.load(AtomicOrdering::SeqCst) {
            return Err(CatalogError::Internal("image update failed".to_string()));
        }
        let mut state = self.state.write().await;
        if !state.images.contains_key(&image.id) {
            return Err(CatalogError::not_found(format!("image {}", image.id)));
        }
        if let Some(missing) = tag_ids.iter().find(|id| !state.tags.contains_key(id)) {
            return Err(CatalogError::not_found(format!("tag {missing}")));
        }

        let now = Utc::now();
        state.image_tags.retain(|(i, _), _| *i != image.id);
        for tag_id in tag_ids {
            state.image_tags.insert((image.id, *tag_id), now);
        }
        let stored = state
            .images
            .get_mut(&image.id)
            .ok_or_else(|| CatalogError::not_found(format!("image {}", image.id)))?;
        stored.original_filename = image.original_filename.clone();
        stored.thumbnail_path = image.thumbnail_path.clone();
        stored.width = image.width;
        stored.height = image.height;
        stored.metadata = image.metadata.clone();
        stored.updated_at = now;
        Ok(stored.clone())
    }

    async fn delete_image(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if state.images.remove(&id).is_none() {
            return Err(CatalogError::not_found(format!("image {id}")));
        }
        state.image_tags.retain(|(image_id, _), _| *image_id != id);
        Ok(())
    }

    async fn list_images(&self, sort: SortOptions, limit: u64, offset: u64) -> Result<Vec<Image>> {
        bump(&self.calls.list_images);
        let state = self.state.read().await;
        let rows = Self::sorted_images(state.images.values(), sort);
        Ok(Self::page(rows, limit, offset))
    }

    async fn list_images_by_tags(
        &self,
        filter: &TagFilter,
        sort: SortOptions,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Image>> {
        bump(&self.calls.list_images_by_tags);
        let state = self.state.read().await;
        let matching = state.images.values().filter(|i| state.matches(i.id, filter));
        let rows = Self::sorted_images(matching, sort);
        Ok(Self::page(rows, limit, offset))
    }

    async fn count_images(&self) -> Result<i64> {
        bump(&self.calls.count_images);
        Ok(self.state.read().await.images.len() as i64)
    }

    async fn count_images_by_tags(&self, filter: &TagFilter) -> Result<i64> {
        bump(&self.calls.count_images_by_tags);
        let state = self.state.read().await;
        Ok(state.images.keys().filter(|id| state.matches(**id, filter)).count() as i64)
    }

    async fn count_images_by_content_type(&self, content_type: &str) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .images
            .values()
            .filter(|i| i.content_type == content_type)
            .count() as i64)
    }
}

#[async_trait]
impl TagStore for MemoryCatalogStore {
    async fn find_tag(&self, id: i64) -> Result<Tag> {
        self.state
            .read()
            .await
            .tags
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("tag {id}")))
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self
            .state
            .read()
            .await
            .tags
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn insert_tag(&self, new_tag: NewTag) -> Result<Tag> {
        let raced = self.racing_tag_names.lock().await.remove(&new_tag.name);
        let mut state = self.state.write().await;
        if raced {
            Self::insert_tag_locked(
                &mut state,
                NewTag {
                    name: new_tag.name.clone(),
                    ..NewTag::default()
                },
            )?;
        }
        Self::insert_tag_locked(&mut state, new_tag)
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tags.remove(&id).is_none() {
            return Err(CatalogError::not_found(format!("tag {id}")));
        }
        state.image_tags.retain(|(_, tag_id), _| *tag_id != id);
        Ok(())
    }

    async fn tags_for_images(&self, image_ids: &[i64]) -> Result<Vec<(i64, Tag)>> {
        bump(&self.calls.tags_for_images);
        let wanted: HashSet<i64> = image_ids.iter().copied().collect();
        let state = self.state.read().await;
        let mut rows: Vec<(i64, Tag)> = state
            .image_tags
            .keys()
            .filter(|(image_id, _)| wanted.contains(image_id))
            .filter_map(|(image_id, tag_id)| state.tags.get(tag_id).map(|t| (*image_id, t.clone())))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.name.cmp(&b.1.name)));
        Ok(rows)
    }

    async fn replace_image_tags(&self, image_id: i64, tag_ids: &[i64]) -> Result<()> {
        if self.fail_tag_assignment.load(AtomicOrdering::SeqCst) {
            return Err(CatalogError::Internal("tag assignment failed".to_string()));
        }
        let mut state = self.state.write().await;
        if !state.images.contains_key(&image_id) {
            return Err(CatalogError::not_found(format!("image {image_id}")));
        }
        if let Some(missing) = tag_ids.iter().find(|id| !state.tags.contains_key(id)) {
            return Err(CatalogError::not_found(format!("tag {missing}")));
        }
        state.image_tags.retain(|(i, _), _| *i != image_id);
        let now = Utc::now();
        for tag_id in tag_ids {
            state.image_tags.insert((image_id, *tag_id), now);
        }
        Ok(())
    }

    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>> {
        let state = self.state.read().await;
        let mut tags: Vec<TagWithCount> = state
            .tags
            .values()
            .map(|t| TagWithCount {
                tag: t.clone(),
                image_count: state.usage_count(t.id),
            })
            .collect();
        tags.sort_by(|a, b| a.tag.name.cmp(&b.tag.name));
        Ok(tags)
    }

    async fn popular_tags(&self, limit: u64) -> Result<Vec<TagWithCount>> {
        let mut tags = self.list_tags_with_counts().await?;
        tags.sort_by(|a, b| {
            b.image_count
                .cmp(&a.image_count)
                .then_with(|| a.tag.name.cmp(&b.tag.name))
        });
        tags.truncate(limit as usize);
        Ok(tags)
    }

    async fn list_predefined_tags(&self) -> Result<Vec<Tag>> {
        let state = self.state.read().await;
        let mut tags: Vec<Tag> = state
            .tags
            .values()
            .filter(|t| t.is_predefined)
            .cloned()
            .collect();
        // Postgres sorts NULLs last in ascending order.
        let key = |t: &Tag| {
            (
                t.category.is_none(),
                t.category.clone(),
                t.display_order.is_none(),
                t.display_order,
                t.name.clone(),
            )
        };
        tags.sort_by_key(key);
        Ok(tags)
    }

    async fn count_tags(&self) -> Result<i64> {
        Ok(self.state.read().await.tags.len() as i64)
    }
}

impl MemoryCatalogStore {
    /// Tag ids currently linked to an image, in id order.
    pub async fn tag_ids_of(&self, image_id: i64) -> Vec<i64> {
        self.state
            .read()
            .await
            .image_tags
            .range((image_id, i64::MIN)..=(image_id, i64::MAX))
            .map(|((_, tag_id), _)| *tag_id)
            .collect()
    }
}
