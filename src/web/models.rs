use serde::{Deserialize, Serialize};

use crate::models::ListImagesRequest;
use crate::query::DEFAULT_PAGE_SIZE;

pub const DEFAULT_URL_EXPIRY_SECS: u64 = 3600;
pub const DEFAULT_POPULAR_LIMIT: u64 = 10;

/// Query string of `GET /api/images`. Tags arrive as one comma separated value.
#[derive(Deserialize, Debug, Default)]
pub struct ListImagesQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub tags: Option<String>,
    pub match_all: Option<bool>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

impl ListImagesQuery {
    pub fn into_request(self) -> ListImagesRequest {
        ListImagesRequest {
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            tags: self.tags.as_deref().map(split_tag_list).unwrap_or_default(),
            match_all: self.match_all.unwrap_or(false),
            sort_by: self.sort_by,
            sort_order: self.sort_order,
        }
    }
}

/// Splits `"a, b,,c"` into `["a", "b", "c"]`.
pub fn split_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize, Debug, Default)]
pub struct ImageUrlQuery {
    pub expiry_secs: Option<u64>,
}

#[derive(Serialize, Debug)]
pub struct ImageUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

#[derive(Deserialize, Debug, Default)]
pub struct PopularTagsQuery {
    pub limit: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_into_request() {
        let query = ListImagesQuery {
            page: Some(3),
            tags: Some(" nature, urban ,,".to_string()),
            match_all: Some(true),
            ..ListImagesQuery::default()
        };
        let request = query.into_request();
        assert_eq!(request.page, 3);
        assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(request.tags, vec!["nature", "urban"]);
        assert!(request.match_all);
    }
}
