//! Pagination shared by ordinary listings and search results.
//!
//! Both paths build their metadata through [`Page::new`], so for the same
//! `(total, per_page, page)` they always agree on windowing.
//!
//! # Example
//!
//! ```
//! use search_sync::Page;
//!
//! let page = Page::new(47, 10, 3);
//! assert_eq!(page.total_pages, 5);
//! assert!(page.has_next());
//! assert!(page.has_prev());
//! assert_eq!(page.offset(), 20);
//! ```
//!
//! # Wire Shape
//!
//! ```json
//! {
//!   "items": [...],
//!   "_meta":  {"page": 3, "per_page": 10, "total_pages": 5, "total_items": 47},
//!   "_links": {"self": "/api/items?page=3&per_page=10", "next": "...", "prev": "..."}
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Offset/limit window plus derived metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Current page, 1-based
    pub page: u32,
    pub per_page: u32,
    /// `ceil(total_items / per_page)`, zero when there are no items
    pub total_pages: u32,
    pub total_items: u64,
}

impl Page {
    /// Compute the window for `page` (1-based). Zero inputs are raised to 1.
    pub fn new(total_items: u64, per_page: u32, page: u32) -> Self {
        let per_page = per_page.max(1);
        let total_pages = total_items.div_ceil(u64::from(per_page));
        Self {
            page: page.max(1),
            per_page,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
            total_items,
        }
    }

    /// Number of items before this page
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.per_page as usize
    }

    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    #[must_use]
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    #[must_use]
    pub fn next_page(&self) -> Option<u32> {
        self.has_next().then(|| self.page + 1)
    }

    #[must_use]
    pub fn prev_page(&self) -> Option<u32> {
        self.has_prev().then(|| self.page - 1)
    }
}

/// Caller-supplied page parameters, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "first_page")]
    pub page: u32,
    /// 0 means "use the configured default"
    #[serde(default)]
    pub per_page: u32,
}

fn first_page() -> u32 { 1 }

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 1, per_page: 0 }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    /// Clamp into `page >= 1` and `1 <= per_page <= max_per_page`.
    #[must_use]
    pub fn normalize(self, default_per_page: u32, max_per_page: u32) -> Self {
        let max_per_page = max_per_page.max(1);
        let per_page = if self.per_page == 0 {
            default_per_page
        } else {
            self.per_page
        };
        Self {
            page: self.page.max(1),
            per_page: per_page.clamp(1, max_per_page),
        }
    }
}

/// Navigation links for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    #[serde(rename = "self")]
    pub current: String,
    pub next: Option<String>,
    pub prev: Option<String>,
}

impl PageLinks {
    /// Build links for `endpoint`, carrying `params` (e.g. the search
    /// expression) on every link.
    pub fn build(endpoint: &str, params: &[(&str, &str)], page: &Page) -> Self {
        let url = |n: u32| {
            let mut query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
                .collect();
            query.push(format!("page={}", n));
            query.push(format!("per_page={}", page.per_page));
            format!("{}?{}", endpoint, query.join("&"))
        };

        Self {
            current: url(page.page),
            next: page.next_page().map(url),
            prev: page.prev_page().map(url),
        }
    }
}

/// Percent-encode a query-string component (RFC 3986 unreserved set kept).
fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// A page of items with its metadata, shared by listings and search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    #[serde(rename = "_meta")]
    pub meta: Page,
    #[serde(rename = "_links", skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, meta: Page) -> Self {
        Self {
            items,
            meta,
            links: None,
        }
    }

    /// Empty page that still reports the requested window
    pub fn empty(per_page: u32, page: u32) -> Self {
        Self::new(Vec::new(), Page::new(0, per_page, page))
    }

    #[must_use]
    pub fn with_links(mut self, endpoint: &str, params: &[(&str, &str)]) -> Self {
        self.links = Some(PageLinks::build(endpoint, params, &self.meta));
        self
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
            links: self.links,
        }
    }
}
