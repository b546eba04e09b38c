//! Domain types shared by the stores, the query engine, the cache and the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::{BTreeMap, HashSet};

use crate::error::{CatalogError, Result};

pub const MAX_TAGS_PER_IMAGE: usize = 20;
pub const MAX_TAG_NAME_LEN: usize = 100;
pub const MAX_FILENAME_LEN: usize = 255;
pub const MAX_FILE_SIZE: i64 = 50 * 1024 * 1024;
pub const MAX_DIMENSION: i32 = 50_000;

pub const SUPPORTED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

pub fn is_supported_content_type(content_type: &str) -> bool {
    SUPPORTED_CONTENT_TYPES.contains(&content_type)
}

/// File extension used for generated filenames of a supported content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// A tag as stored in the catalog. `name` is always normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_predefined: bool,
    pub category: Option<String>,
    pub display_order: Option<i32>,
}

/// Opaque per-image metadata. Only checked for being well-formed JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Box<RawValue>);

impl Metadata {
    pub fn parse(text: &str) -> Result<Self> {
        RawValue::from_string(text.to_owned())
            .map(Metadata)
            .map_err(|e| CatalogError::validation(format!("metadata must be well-formed JSON: {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Metadata {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: i64,
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub uploaded_at: DateTime<Utc>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sorted by name ascending, unique by name.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Image {
    pub fn set_tags(&mut self, mut tags: Vec<Tag>) {
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags.dedup_by(|a, b| a.name == b.name);
        self.tags = tags;
    }

    pub fn tag_names(&self) -> Vec<&str> {
        self.tags.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Row data for a freshly uploaded image, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub thumbnail_path: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub metadata: Option<Metadata>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTag {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_predefined: bool,
    pub category: Option<String>,
    pub display_order: Option<i32>,
}

/// A curated tag definition, usually loaded from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredefinedTag {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub display_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub image_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_images: i64,
    pub images_by_content_type: BTreeMap<String, i64>,
    pub total_tags: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateImageRequest {
    pub original_filename: String,
    pub content_type: String,
    pub file_size: i64,
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Raw JSON text.
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateImageRequest {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// An incoming listing request, as received from a caller. Nothing here is trusted;
/// see [`crate::query::NormalizedListRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListImagesRequest {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    crate::query::DEFAULT_PAGE_SIZE
}

impl Default for ListImagesRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
            tags: Vec::new(),
            match_all: false,
            sort_by: None,
            sort_order: None,
        }
    }
}

/// Trims, lowercases and validates a single tag name.
pub fn normalize_tag_name(raw: &str) -> Result<String> {
    let name = raw.trim().to_lowercase();
    if name.is_empty() {
        return Err(CatalogError::validation("tag name must not be empty"));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(CatalogError::validation(format!(
            "tag name '{name}' exceeds {MAX_TAG_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(CatalogError::validation(format!(
            "tag name '{name}' contains invalid character '{bad}' (allowed: a-z, 0-9, -)"
        )));
    }
    Ok(name)
}

/// Normalizes the tag set requested for one image.
///
/// Two names that collide after normalization are a `Duplicate`, not a silent merge.
/// Order of first appearance is preserved.
pub fn normalize_tag_names(raw: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut names = Vec::with_capacity(raw.len());
    for raw_name in raw {
        let name = normalize_tag_name(raw_name)?;
        if !seen.insert(name.clone()) {
            return Err(CatalogError::Duplicate(format!(
                "tag '{name}' was requested more than once"
            )));
        }
        names.push(name);
    }
    if names.len() > MAX_TAGS_PER_IMAGE {
        return Err(CatalogError::validation(format!(
            "an image can have at most {MAX_TAGS_PER_IMAGE} tags, got {}",
            names.len()
        )));
    }
    Ok(names)
}

/// Normalizes tag names used as a query filter: sorted and de-duplicated.
pub fn normalize_tag_filter(raw: &[String]) -> Result<Vec<String>> {
    let mut names = raw
        .iter()
        .map(|n| normalize_tag_name(n))
        .collect::<Result<Vec<_>>>()?;
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_tag_name() {
        assert_eq!(normalize_tag_name("  Sunset ").unwrap(), "sunset");
        assert_eq!(normalize_tag_name("black-and-white").unwrap(), "black-and-white");
        assert!(matches!(normalize_tag_name("   "), Err(CatalogError::Validation(_))));
        assert!(matches!(normalize_tag_name("new york"), Err(CatalogError::Validation(_))));
        assert!(matches!(normalize_tag_name("café"), Err(CatalogError::Validation(_))));
        assert!(normalize_tag_name(&"a".repeat(100)).is_ok());
        assert!(normalize_tag_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_duplicate_after_normalization_is_rejected() {
        let result = normalize_tag_names(&strings(&["Nature", "Sunset", "sunset"]));
        assert!(matches!(result, Err(CatalogError::Duplicate(_))));
    }

    #[test]
    fn test_normalize_tag_names_keeps_request_order() {
        let names = normalize_tag_names(&strings(&["Urban", "nature"])).unwrap();
        assert_eq!(names, vec!["urban", "nature"]);
    }

    #[test]
    fn test_too_many_tags() {
        let raw: Vec<String> = (0..21).map(|i| format!("tag-{i}")).collect();
        assert!(matches!(normalize_tag_names(&raw), Err(CatalogError::Validation(_))));
        assert!(normalize_tag_names(&raw[..20]).is_ok());
    }

    #[test]
    fn test_filter_is_sorted_and_deduplicated() {
        let names = normalize_tag_filter(&strings(&["Urban", "nature", "URBAN"])).unwrap();
        assert_eq!(names, vec!["nature", "urban"]);
    }

    #[test]
    fn test_metadata_must_be_json() {
        let meta = Metadata::parse(r#"{"camera":"x100"}"#).unwrap();
        assert_eq!(meta.as_str(), r#"{"camera":"x100"}"#);
        assert!(matches!(Metadata::parse("{not json"), Err(CatalogError::Validation(_))));
    }

    #[test]
    fn test_set_tags_sorts_by_name() {
        let now = Utc::now();
        let tag = |id: i64, name: &str| Tag {
            id,
            name: name.to_string(),
            description: None,
            color: None,
            created_at: now,
            is_predefined: false,
            category: None,
            display_order: None,
        };
        let mut image = Image {
            id: 1,
            filename: "a.jpg".into(),
            original_filename: "a.jpg".into(),
            content_type: "image/jpeg".into(),
            file_size: 10,
            storage_path: "a.jpg".into(),
            thumbnail_path: None,
            width: None,
            height: None,
            uploaded_at: now,
            metadata: None,
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        };
        image.set_tags(vec![tag(2, "urban"), tag(1, "nature")]);
        assert_eq!(image.tag_names(), vec!["nature", "urban"]);
    }
}
