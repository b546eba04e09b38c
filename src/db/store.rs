//! Storage capabilities the query engine and services are written against.
//!
//! `PgCatalogStore` is the production implementation; `MemoryCatalogStore` backs the
//! tests and local runs without a database.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Image, NewImage, NewTag, Tag, TagWithCount};
use crate::query::{SortOptions, TagFilter};

/// Image metadata rows. Images returned here never carry tags; attaching them is the
/// query engine's job.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn insert_image(&self, new_image: NewImage) -> Result<Image>;

    /// Fails with `NotFound` if no row has this id.
    async fn find_image(&self, id: i64) -> Result<Image>;

    /// Persists the mutable columns of `image`, replaces its tag set with `tag_ids` and
    /// bumps `updated_at`. Either all of it is written or none of it.
    async fn update_image(&self, image: &Image, tag_ids: &[i64]) -> Result<Image>;

    /// Removes the row; junction rows go with it.
    async fn delete_image(&self, id: i64) -> Result<()>;

    async fn list_images(&self, sort: SortOptions, limit: u64, offset: u64) -> Result<Vec<Image>>;

    async fn list_images_by_tags(
        &self,
        filter: &TagFilter,
        sort: SortOptions,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Image>>;

    async fn count_images(&self) -> Result<i64>;

    /// Exact size of the result set `list_images_by_tags` pages over.
    async fn count_images_by_tags(&self, filter: &TagFilter) -> Result<i64>;

    async fn count_images_by_content_type(&self, content_type: &str) -> Result<i64>;
}

/// Tags and the image-tag junction relation.
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn find_tag(&self, id: i64) -> Result<Tag>;

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Fails with `Duplicate` when the name is already taken.
    async fn insert_tag(&self, new_tag: NewTag) -> Result<Tag>;

    async fn delete_tag(&self, id: i64) -> Result<()>;

    /// Every `(image_id, tag)` pair for the given images, ordered by image id, then tag name.
    async fn tags_for_images(&self, image_ids: &[i64]) -> Result<Vec<(i64, Tag)>>;

    /// Replaces the whole tag set of one image in a single transaction.
    async fn replace_image_tags(&self, image_id: i64, tag_ids: &[i64]) -> Result<()>;

    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>>;

    async fn popular_tags(&self, limit: u64) -> Result<Vec<TagWithCount>>;

    async fn list_predefined_tags(&self) -> Result<Vec<Tag>>;

    async fn count_tags(&self) -> Result<i64>;
}
