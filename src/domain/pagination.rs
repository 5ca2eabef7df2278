//! Page/limit pagination over fully materialised lists.

use serde::Serialize;

use super::error::DomainError;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 25;
pub const MAX_LIMIT: u32 = 25;

/// A validated 1-based page number paired with a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    limit: u32,
}

impl PageRequest {
    pub fn new(page: u32, limit: u32) -> Result<Self, DomainError> {
        if page < 1 {
            return Err(DomainError::validation(
                "page",
                "must be greater than or equal to 1",
            ));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(DomainError::validation(
                "limit",
                format!("must be between 1 and {MAX_LIMIT}"),
            ));
        }
        Ok(Self { page, limit })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One page of a list plus the totals needed to render pagination controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub total_pages: usize,
}

/// Slice `items` to the requested page.
///
/// `start = (page - 1) * limit`, the slice is `[start, start + limit)` clamped to the list,
/// and `total_pages = ceil(total / limit)`.
pub fn paginate<T: Clone>(items: &[T], request: PageRequest) -> Paginated<T> {
    let total = items.len();
    let limit = request.limit as usize;
    let start = (request.page as usize - 1).saturating_mul(limit);
    let end = start.saturating_add(limit).min(total);

    let data = if start < total {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };

    Paginated {
        data,
        total,
        page: request.page,
        limit: request.limit,
        total_pages: total.div_ceil(limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_page_of_seven_items() {
        let items: Vec<u32> = (0..7).collect();
        let request = PageRequest::new(2, 3).expect("valid page");

        let page = paginate(&items, request);

        assert_eq!(page.data, vec![3, 4, 5]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
        assert_eq!(page.limit, 3);
    }

    #[test]
    fn empty_list_has_no_pages() {
        let items: Vec<u32> = Vec::new();
        let page = paginate(&items, PageRequest::new(1, 25).expect("valid page"));

        assert!(page.data.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn last_page_is_partial() {
        let items: Vec<u32> = (0..7).collect();
        let page = paginate(&items, PageRequest::new(3, 3).expect("valid page"));

        assert_eq!(page.data, vec![6]);
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let items: Vec<u32> = (0..7).collect();
        let page = paginate(&items, PageRequest::new(9, 3).expect("valid page"));

        assert!(page.data.is_empty());
        assert_eq!(page.total_pages, 3);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(
            PageRequest::new(0, 10).expect_err("page zero").field(),
            "page"
        );
        assert_eq!(
            PageRequest::new(1, 0).expect_err("limit zero").field(),
            "limit"
        );
        assert_eq!(
            PageRequest::new(1, 26).expect_err("limit too large").field(),
            "limit"
        );
        assert!(PageRequest::new(1, 25).is_ok());
    }
}
