//! Extractor: dispatches fetched content to the parser of its page kind.

use chrono::{DateTime, Utc};
use url::Url;

use crate::crawling::fetcher::FetchedPage;
use crate::domain::crawl_target::PageKind;
use crate::domain::snapshot::ProductSnapshot;
use crate::error::ExtractionError;
use crate::infrastructure::parsing::{DetailParser, ListingLink, ListingParser};

/// Structured result of one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Product links in page order.
    Listing(Vec<ListingLink>),
    Detail(ProductSnapshot),
}

pub struct Extractor {
    listing: ListingParser,
    detail: DetailParser,
}

impl Extractor {
    pub fn new(base_url: &str) -> Result<Self, ExtractionError> {
        Ok(Self {
            listing: ListingParser::new(base_url)?,
            detail: DetailParser::new()?,
        })
    }

    pub fn extract(&self, page: &FetchedPage, captured_at: DateTime<Utc>) -> Result<Extraction, ExtractionError> {
        match page.kind {
            PageKind::Listing => Ok(Extraction::Listing(self.listing_links(&page.content))),
            PageKind::Detail => {
                let source_url = Url::parse(&page.url)
                    .map_err(|e| ExtractionError::invalid("source_url", e.to_string()))?;
                self.snapshot(&page.content, &source_url, captured_at)
                    .map(Extraction::Detail)
            }
        }
    }

    pub fn listing_links(&self, html: &str) -> Vec<ListingLink> {
        self.listing.parse(html)
    }

    pub fn snapshot(
        &self,
        html: &str,
        source_url: &Url,
        captured_at: DateTime<Utc>,
    ) -> Result<ProductSnapshot, ExtractionError> {
        self.detail.parse(html, source_url, captured_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(kind: PageKind, url: &str, content: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            kind,
            status: Some(200),
            content: content.to_string(),
            ready: true,
        }
    }

    #[test]
    fn dispatches_on_page_kind() {
        let extractor = Extractor::new("https://www.musinsa.com").expect("extractor");

        let listing = page(
            PageKind::Listing,
            "https://www.musinsa.com/category/001",
            r#"<a class="gtm-select-item" data-item-id="11" href="/products/11">x</a>"#,
        );
        match extractor.extract(&listing, Utc::now()).expect("listing") {
            Extraction::Listing(links) => assert_eq!(links.len(), 1),
            other => panic!("unexpected {other:?}"),
        }

        let detail = page(
            PageKind::Detail,
            "https://www.musinsa.com/products/11",
            r#"<script>window.__MSS_FE__.product.state = {"goodsNm":"셔츠","goodsPrice":{"normalPrice":20000,"salePrice":15000}};</script>"#,
        );
        match extractor.extract(&detail, Utc::now()).expect("detail") {
            Extraction::Detail(snapshot) => assert_eq!(snapshot.prices().sale(), 15_000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn detail_shape_mismatch_is_an_extraction_error() {
        let extractor = Extractor::new("https://www.musinsa.com").expect("extractor");
        let detail = page(PageKind::Detail, "https://www.musinsa.com/products/12", "<html>blocked</html>");
        let err = extractor.extract(&detail, Utc::now()).expect_err("no state");
        assert_eq!(err.field, "product_state");
    }
}
