//! Crawl targets: the ephemeral unit of work handed from the enumerator or
//! the scheduler to the fetcher. Never persisted.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Shape of a page. The set is closed: every fetch and extraction names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Category listing with product links.
    Listing,
    /// Single product page.
    Detail,
}

impl PageKind {
    /// Text that must be present before the page counts as rendered.
    pub const fn readiness_marker(self) -> &'static str {
        match self {
            Self::Listing => "gtm-select-item",
            Self::Detail => "__MSS_FE__",
        }
    }

    /// CSS selector a browser session waits for.
    pub const fn readiness_selector(self) -> &'static str {
        match self {
            Self::Listing => "a.gtm-select-item",
            Self::Detail => "script",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Listing => "listing",
            Self::Detail => "detail",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store category code, e.g. `"002"` for outerwear.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position inside a category enumeration. Feeding it back into the
/// enumerator resumes at `page`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingCursor {
    pub category: CategoryId,
    /// 1-based listing page number.
    pub page: u32,
}

impl ListingCursor {
    pub fn first(category: CategoryId) -> Self {
        Self { category, page: 1 }
    }

    #[must_use]
    pub fn next(&self) -> Self {
        Self {
            category: self.category.clone(),
            page: self.page + 1,
        }
    }
}

/// One unit of crawl work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    /// A listing page of a category.
    CategoryPage(ListingCursor),
    /// A product page, either discovered on a listing or already registered.
    Product {
        url: Url,
        /// Listing position it was discovered at, if any.
        origin: Option<ListingCursor>,
    },
}

impl CrawlTarget {
    pub fn product(url: Url) -> Self {
        Self::Product { url, origin: None }
    }

    pub const fn page_kind(&self) -> PageKind {
        match self {
            Self::CategoryPage(_) => PageKind::Listing,
            Self::Product { .. } => PageKind::Detail,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::CategoryPage(cursor) => format!("category:{}#{}", cursor.category, cursor.page),
            Self::Product { url, .. } => url.to_string(),
        }
    }
}

/// Stable identity of a product URL: the goods number in `/products/{no}`
/// (or the legacy `/app/goods/{no}`) when present, otherwise the URL without
/// query or fragment.
pub fn product_key(url: &Url) -> String {
    let segments: Vec<&str> = url.path_segments().map(Iterator::collect).unwrap_or_default();
    for pair in segments.windows(2) {
        if matches!(pair[0], "products" | "goods")
            && !pair[1].is_empty()
            && pair[1].chars().all(|c| c.is_ascii_digit())
        {
            return pair[1].to_string();
        }
    }
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    canonical.to_string()
}
