use serde::{Deserialize, Serialize};

use crate::models::Image;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// A page request. Always in range once constructed through [`Pagination::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    /// Clamps `page` to `>= 1` and `page_size` to `1..=100`.
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn limit(&self) -> u64 {
        self.page_size as u64
    }

    /// Rows to skip. Saturates at `i64::MAX`, the largest OFFSET PostgreSQL accepts, so
    /// an absurd page number reads as an empty page instead of overflowing.
    pub fn offset(&self) -> u64 {
        let skipped = (self.page as u64 - 1).saturating_mul(self.page_size as u64);
        skipped.min(i64::MAX as u64)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// `ceil(total_count / page_size)`, or 0 for a non-positive page size.
pub fn total_pages(total_count: i64, page_size: i64) -> i64 {
    if page_size <= 0 || total_count <= 0 {
        return 0;
    }
    (total_count + page_size - 1) / page_size
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<Image>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl ImageListResponse {
    pub fn new(images: Vec<Image>, total_count: i64, page: i64, page_size: i64) -> Self {
        let total_pages = total_pages(total_count, page_size);
        Self {
            images,
            total_count,
            page,
            page_size,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(105, 20), 6);
        assert_eq!(total_pages(100, 20), 5);
        assert_eq!(total_pages(1, 20), 1);
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(105, 0), 0);
        assert_eq!(total_pages(105, -3), 0);
    }

    #[test]
    fn test_total_pages_matches_ceiling_division() {
        for total in 0..300i64 {
            for size in 1..=25i64 {
                let expected = (total as f64 / size as f64).ceil() as i64;
                assert_eq!(total_pages(total, size), expected, "total={total} size={size}");
            }
        }
    }

    #[test]
    fn test_page_flags_for_105_images() {
        let first = ImageListResponse::new(Vec::new(), 105, 1, 20);
        assert_eq!(first.total_pages, 6);
        assert!(first.has_next_page);
        assert!(!first.has_prev_page);

        let last = ImageListResponse::new(Vec::new(), 105, 6, 20);
        assert!(!last.has_next_page);
        assert!(last.has_prev_page);
    }

    #[test]
    fn test_pagination_clamps_and_offsets() {
        let p = Pagination::new(0, 500);
        assert_eq!(p, Pagination { page: 1, page_size: 100 });
        let p = Pagination::new(3, 20);
        assert_eq!(p.limit(), 20);
        assert_eq!(p.offset(), 40);
        assert_eq!(Pagination::new(2, 0).page_size, 1);
    }

    #[test]
    fn test_offset_saturates_for_huge_pages() {
        let p = Pagination::new(i64::MAX, 20);
        assert_eq!(p.page, i64::MAX);
        assert_eq!(p.offset(), i64::MAX as u64);
        assert_eq!(Pagination::new(i64::MAX, 1).offset(), (i64::MAX - 1) as u64);
    }
}
