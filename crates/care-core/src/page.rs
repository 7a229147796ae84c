//! # Pagination
//!
//! `page` defaults to 1 and `page_size` to 10. Values of zero or below
//! fall back to the default; page sizes above [`MAX_PAGE_SIZE`] clamp to it.

use serde::{Deserialize, Serialize};

/// Default page number.
pub const DEFAULT_PAGE: i64 = 1;
/// Default page size.
pub const DEFAULT_PAGE_SIZE: i64 = 10;
/// Upper bound on page size.
pub const MAX_PAGE_SIZE: i64 = 100;

/// A clamped pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Clamp raw query values.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p > 0 => p,
            _ => DEFAULT_PAGE,
        };
        let page_size = match page_size {
            Some(s) if s > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
            Some(s) if s > 0 => s,
            _ => DEFAULT_PAGE_SIZE,
        };
        Self { page, page_size }
    }

    /// SQL `LIMIT`.
    pub fn limit(&self) -> i64 {
        self.page_size
    }

    /// SQL `OFFSET`.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    /// Slice an already-filtered, already-sorted collection.
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(self.limit()).unwrap_or(0);
        items.iter().skip(offset).take(limit).cloned().collect()
    }
}

/// One page of results, echoed back with the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Page<T> {
    /// Wrap `items` with the request that selected them.
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        Self {
            items,
            total,
            page: request.page,
            page_size: request.page_size,
        }
    }

    /// Convert the items while keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_absent() {
        assert_eq!(PageRequest::new(None, None), PageRequest::default());
    }

    #[test]
    fn non_positive_values_fall_back_to_defaults() {
        let req = PageRequest::new(Some(0), Some(0));
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 10);
        let req = PageRequest::new(Some(-3), Some(-50));
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, 10);
    }

    #[test]
    fn oversized_page_size_clamps_to_max() {
        assert_eq!(PageRequest::new(Some(2), Some(500)).page_size, 100);
        assert_eq!(PageRequest::new(Some(2), Some(100)).page_size, 100);
    }

    #[test]
    fn offset_and_slice() {
        let req = PageRequest::new(Some(3), Some(2));
        assert_eq!(req.offset(), 4);
        let items: Vec<i32> = (0..7).collect();
        assert_eq!(req.slice(&items), vec![4, 5]);
        let past_end = PageRequest::new(Some(9), Some(2));
        assert!(past_end.slice(&items).is_empty());
    }

    #[test]
    fn page_serializes_camel_case() {
        let page = Page::new(vec![1, 2], 2, PageRequest::default());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pageSize"], 10);
        assert_eq!(json["total"], 2);
    }

    proptest::proptest! {
        #[test]
        fn clamped_values_are_always_in_range(page in proptest::option::of(-1000i64..1000), size in proptest::option::of(-1000i64..1000)) {
            let req = PageRequest::new(page, size);
            proptest::prop_assert!(req.page >= 1);
            proptest::prop_assert!((1..=MAX_PAGE_SIZE).contains(&req.page_size));
            proptest::prop_assert!(req.offset() >= 0);
        }
    }
}
