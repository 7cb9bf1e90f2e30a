//! Backend-agnostic offset/limit paging and tri-state chain filters.
//!
//! Both storage backends route through these types so that the same
//! request yields the same slice and the same total.

use serde::{Deserialize, Serialize};

/// A 1-based page request. `size == 0` means "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub size: usize,
}

impl Pagination {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page: page.max(1),
            size,
        }
    }

    /// One page holding everything.
    pub fn all() -> Self {
        Self::new(1, 0)
    }

    /// Number of records skipped before this page.
    pub fn offset(&self) -> usize {
        self.page.max(1).saturating_sub(1).saturating_mul(self.size)
    }

    /// Maximum records on this page, `None` when unbounded.
    pub fn limit(&self) -> Option<usize> {
        (self.size > 0).then_some(self.size)
    }

    /// Cut this page out of an already filtered and ordered sequence.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        let iter = items.into_iter().skip(self.offset());
        match self.limit() {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results plus the size of the whole filtered set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: usize, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            size: pagination.size,
        }
    }

    /// Page an in-memory, already filtered and ordered set.
    pub fn from_filtered(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len();
        Self::new(pagination.slice(all), total, pagination)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Keyword and tri-state flag filter for chain listings.
///
/// `None` on `root`/`disabled` means "no constraint", never `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFilter {
    pub keywords: Option<String>,
    pub root: Option<bool>,
    pub disabled: Option<bool>,
}

impl ChainFilter {
    pub fn keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = Some(keywords.into());
        self
    }

    pub fn root(mut self, root: bool) -> Self {
        self.root = Some(root);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// The keyword to match, ignoring an empty string.
    pub fn keyword(&self) -> Option<&str> {
        self.keywords.as_deref().filter(|k| !k.is_empty())
    }

    /// Case-sensitive substring match on `name`, exact match on present flags.
    pub fn matches(&self, name: &str, root: bool, disabled: bool) -> bool {
        self.keyword().is_none_or(|k| name.contains(k))
            && tri_state(self.root, root)
            && tri_state(self.disabled, disabled)
    }
}

/// An absent filter accepts every value.
pub fn tri_state(filter: Option<bool>, value: bool) -> bool {
    filter.is_none_or(|wanted| wanted == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_zero_is_first_page() {
        let p = Pagination::new(0, 10);
        assert_eq!(p.page, 1);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn test_slice_middle_and_tail() {
        let items: Vec<u32> = (0..25).collect();
        assert_eq!(Pagination::new(2, 10).slice(items.clone()), (10..20).collect::<Vec<_>>());
        assert_eq!(Pagination::new(3, 10).slice(items.clone()), (20..25).collect::<Vec<_>>());
        assert!(Pagination::new(4, 10).slice(items).is_empty());
    }

    #[test]
    fn test_size_zero_returns_everything() {
        let page = Page::from_filtered((0..7).collect::<Vec<u32>>(), Pagination::all());
        assert_eq!(page.len(), 7);
        assert_eq!(page.total, 7);
    }

    #[test]
    fn test_walking_pages_sums_to_total() {
        let all: Vec<u32> = (0..23).collect();
        let mut seen = 0;
        for n in 1..=5 {
            let page = Page::from_filtered(all.clone(), Pagination::new(n, 5));
            assert_eq!(page.total, 23);
            seen += page.len();
        }
        assert_eq!(seen, 23);
    }

    #[test]
    fn test_tri_state_filter() {
        let any = ChainFilter::default();
        assert!(any.matches("a", true, true));
        assert!(any.matches("a", false, false));

        let disabled = ChainFilter::default().disabled(true);
        assert!(disabled.matches("a", false, true));
        assert!(!disabled.matches("a", false, false));

        let not_root = ChainFilter::default().root(false);
        assert!(not_root.matches("a", false, true));
        assert!(!not_root.matches("a", true, true));
    }

    #[test]
    fn test_keyword_is_case_sensitive_substring() {
        let f = ChainFilter::default().keywords("Order");
        assert!(f.matches("NewOrders", false, false));
        assert!(!f.matches("neworders", false, false));
        assert!(ChainFilter::default().keywords("").matches("anything", false, false));
    }
}
