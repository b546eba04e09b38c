//! Fixtures shared by the unit tests.

use chrono::Utc;
use std::sync::Arc;

use crate::db::{ImageStore, MemoryCatalogStore, TagStore};
use crate::models::{Image, NewImage, NewTag};

pub fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn new_image(filename: &str) -> NewImage {
    NewImage {
        filename: filename.to_string(),
        original_filename: filename.to_string(),
        content_type: "image/jpeg".to_string(),
        file_size: 1024,
        storage_path: format!("files/{filename}"),
        thumbnail_path: None,
        width: Some(640),
        height: Some(480),
        metadata: None,
        uploaded_at: Utc::now(),
    }
}

/// Inserts an image row and links it to `tags`, creating tags that do not exist yet.
pub async fn seed_image(store: &Arc<MemoryCatalogStore>, filename: &str, tags: &[&str]) -> Image {
    let mut image = store.insert_image(new_image(filename)).await.unwrap();
    let mut linked = Vec::new();
    for name in tags {
        let tag = match store.find_tag_by_name(name).await.unwrap() {
            Some(tag) => tag,
            None => store
                .insert_tag(NewTag {
                    name: name.to_string(),
                    ..NewTag::default()
                })
                .await
                .unwrap(),
        };
        linked.push(tag);
    }
    let ids: Vec<i64> = linked.iter().map(|t| t.id).collect();
    store.replace_image_tags(image.id, &ids).await.unwrap();
    image.set_tags(linked);
    image
}
