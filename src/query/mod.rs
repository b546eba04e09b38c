//! The query engine: plain, tag-preloaded and tag-filtered listings over the stores.
//!
//! Tags are never aggregated per row in SQL. A page of image rows is fetched first and
//! the tags of exactly those images are then loaded in one batch and attached in memory.

pub mod pagination;
pub mod sort;

use futures::try_join;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use pagination::{total_pages, ImageListResponse, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use sort::{SortField, SortOptions, SortOrder};

use crate::db::store::{ImageStore, TagStore};
use crate::error::Result;
use crate::models::{normalize_tag_filter, Image, ListImagesRequest, Tag};

/// A normalized set-membership filter over tag names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagFilter {
    names: Vec<String>,
    match_all: bool,
}

impl TagFilter {
    /// Normalizes, sorts and de-duplicates `raw`. Invalid names are a `Validation` error.
    pub fn new(raw: &[String], match_all: bool) -> Result<Self> {
        Ok(Self {
            names: normalize_tag_filter(raw)?,
            match_all,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn match_all(&self) -> bool {
        self.match_all
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A listing request after clamping, sort whitelisting and tag normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedListRequest {
    pub pagination: Pagination,
    pub sort: SortOptions,
    pub filter: Option<TagFilter>,
}

impl NormalizedListRequest {
    pub fn from_request(request: &ListImagesRequest) -> Result<Self> {
        let filter = if request.tags.is_empty() {
            None
        } else {
            Some(TagFilter::new(&request.tags, request.match_all)?)
        };
        Ok(Self {
            pagination: Pagination::new(request.page, request.page_size),
            sort: SortOptions::from_raw(request.sort_by.as_deref(), request.sort_order.as_deref()),
            filter,
        })
    }
}

#[derive(Clone)]
pub struct QueryEngine {
    images: Arc<dyn ImageStore>,
    tags: Arc<dyn TagStore>,
}

impl QueryEngine {
    pub fn new(images: Arc<dyn ImageStore>, tags: Arc<dyn TagStore>) -> Self {
        Self { images, tags }
    }

    /// One page of all images (without tags) and the exact total.
    pub async fn list(&self, pagination: Pagination, sort: SortOptions) -> Result<(Vec<Image>, i64)> {
        let (images, total_count) = try_join!(
            self.images.list_images(sort, pagination.limit(), pagination.offset()),
            self.images.count_images()
        )?;
        Ok((images, total_count))
    }

    /// One page of all images with their tags attached.
    pub async fn list_with_tags(&self, pagination: Pagination, sort: SortOptions) -> Result<Vec<Image>> {
        let mut images = self
            .images
            .list_images(sort, pagination.limit(), pagination.offset())
            .await?;
        self.attach_tags(&mut images).await?;
        Ok(images)
    }

    /// Images carrying every tag (`match_all`) or at least one tag of `tag_names`,
    /// with tags attached, and the exact size of the whole result set.
    pub async fn get_by_tags(
        &self,
        tag_names: &[String],
        match_all: bool,
        pagination: Pagination,
        sort: SortOptions,
    ) -> Result<(Vec<Image>, i64)> {
        if tag_names.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let filter = TagFilter::new(tag_names, match_all)?;
        self.get_by_filter(&filter, pagination, sort).await
    }

    pub async fn get_by_filter(
        &self,
        filter: &TagFilter,
        pagination: Pagination,
        sort: SortOptions,
    ) -> Result<(Vec<Image>, i64)> {
        if filter.is_empty() {
            return Ok((Vec::new(), 0));
        }
        let (mut images, total_count) = try_join!(
            self.images
                .list_images_by_tags(filter, sort, pagination.limit(), pagination.offset()),
            self.images.count_images_by_tags(filter)
        )?;
        self.attach_tags(&mut images).await?;
        debug!(
            tags = ?filter.names(),
            match_all = filter.match_all(),
            page = pagination.page,
            returned = images.len(),
            total_count,
            "Tag-filtered listing complete"
        );
        Ok((images, total_count))
    }

    /// A single image with its tags. `NotFound` if the id does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<Image> {
        let image = self.images.find_image(id).await?;
        let mut images = vec![image];
        self.attach_tags(&mut images).await?;
        Ok(images.remove(0))
    }

    pub async fn count(&self) -> Result<i64> {
        self.images.count_images().await
    }

    pub async fn count_by_content_type(&self, content_type: &str) -> Result<i64> {
        self.images.count_images_by_content_type(content_type).await
    }

    /// Second phase of the preload: one batch query for the tags of `images`.
    async fn attach_tags(&self, images: &mut [Image]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = images.iter().map(|i| i.id).collect();
        let rows = self.tags.tags_for_images(&ids).await?;

        let mut tag_map: HashMap<i64, Vec<Tag>> = HashMap::new();
        for (image_id, tag) in rows {
            tag_map.entry(image_id).or_default().push(tag);
        }
        for image in images.iter_mut() {
            image.set_tags(tag_map.remove(&image.id).unwrap_or_default());
        }
        Ok(())
    }
}
