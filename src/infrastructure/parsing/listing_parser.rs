//! Category listing parser: product links in page order.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::compile_selectors;
use crate::domain::crawl_target::product_key;
use crate::error::ExtractionError;

/// Product anchors, most specific first. The first selector that matches
/// anything wins.
const PRODUCT_LINK_SELECTORS: &[&str] = &["a.gtm-select-item", "a[href*='/products/']"];

/// One product link found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub url: Url,
    /// Stable product identity (goods number when the URL carries one).
    pub key: String,
}

pub struct ListingParser {
    base_url: Url,
    link_selectors: Vec<Selector>,
}

impl ListingParser {
    pub fn new(base_url: &str) -> Result<Self, ExtractionError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ExtractionError::invalid("base_url", e.to_string()))?;
        Ok(Self {
            base_url,
            link_selectors: compile_selectors(PRODUCT_LINK_SELECTORS)?,
        })
    }

    /// Product links in page order, duplicates within the page removed.
    /// An empty result is a valid page (end of the listing).
    pub fn parse(&self, html: &str) -> Vec<ListingLink> {
        let document = Html::parse_document(html);

        for selector in &self.link_selectors {
            let anchors: Vec<ElementRef> = document.select(selector).collect();
            if anchors.is_empty() {
                continue;
            }

            let mut seen = HashSet::new();
            let links: Vec<ListingLink> = anchors
                .iter()
                .filter_map(|anchor| self.link_from_anchor(anchor))
                .filter(|link| seen.insert(link.key.clone()))
                .collect();
            debug!("Found {} product links ({} anchors)", links.len(), anchors.len());
            return links;
        }
        Vec::new()
    }

    fn link_from_anchor(&self, anchor: &ElementRef) -> Option<ListingLink> {
        let href = anchor.value().attr("href")?.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        let mut url = self.base_url.join(href).ok()?;
        url.set_fragment(None);

        let key = anchor
            .value()
            .attr("data-item-id")
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .map_or_else(|| product_key(&url), str::to_string);
        Some(ListingLink { url, key })
    }
}
