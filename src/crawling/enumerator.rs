//! Target enumerator: category → lazy, paginated stream of product targets.
//!
//! The first listing page is fetched eagerly so that an unreachable or
//! unparseable category is reported as [`EnumerationError`]. Later pages are
//! fetched on demand; a failure there ends the stream (best effort).
//! Cancellation stops page fetches but not the draining of targets that
//! were already listed.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::extractor::Extractor;
use crate::crawling::fetcher::PageFetcher;
use crate::domain::crawl_target::{CategoryId, CrawlTarget, ListingCursor, PageKind};
use crate::error::{EnumerationError, ExtractionError, FetchError};
use crate::infrastructure::config::CatalogConfig;
use crate::infrastructure::parsing::ListingLink;

pub type TargetStream = BoxStream<'static, CrawlTarget>;

pub struct TargetEnumerator {
    fetcher: Arc<PageFetcher>,
    extractor: Arc<Extractor>,
    catalog: CatalogConfig,
}

impl TargetEnumerator {
    pub fn new(fetcher: Arc<PageFetcher>, extractor: Arc<Extractor>, catalog: CatalogConfig) -> Self {
        Self {
            fetcher,
            extractor,
            catalog,
        }
    }

    /// Enumerate `category`, starting at `resume` when given. Product
    /// targets carry the cursor they were found at, so a consumer can
    /// resume an interrupted enumeration from the last cursor it saw.
    pub async fn enumerate(
        self: &Arc<Self>,
        category: CategoryId,
        resume: Option<ListingCursor>,
        cancel: CancellationToken,
    ) -> Result<TargetStream, EnumerationError> {
        let cursor = resume.unwrap_or_else(|| ListingCursor::first(category.clone()));
        let links = self
            .listing_page(&cursor, &cancel)
            .await
            .map_err(|e| EnumerationError::navigation(category.as_str(), e))?;
        if links.is_empty() {
            return Err(EnumerationError::parse(
                category.as_str(),
                ExtractionError::missing("product_links"),
            ));
        }

        let mut pager = Pager {
            enumerator: Arc::clone(self),
            cursor: cursor.clone(),
            seen: HashSet::new(),
            buffer: VecDeque::new(),
            pages_fetched: 0,
            yielded: 0,
            done: false,
            cancel,
        };
        pager.absorb(links);
        info!(category = %category, start_page = cursor.page, "📂 Enumerating category");

        Ok(stream::unfold(pager, Pager::next_target).boxed())
    }

    async fn listing_page(&self, cursor: &ListingCursor, cancel: &CancellationToken) -> Result<Vec<ListingLink>, FetchError> {
        let url = self.catalog.listing_url(cursor.category.as_str(), cursor.page);
        let page = self.fetcher.fetch(&url, PageKind::Listing, cancel).await?;
        let links = self.extractor.listing_links(&page.content);
        debug!(category = %cursor.category, page = cursor.page, links = links.len(), "Listing page parsed");
        Ok(links)
    }

    const fn max_targets(&self) -> Option<usize> {
        match self.catalog.max_targets_per_category {
            0 => None,
            n => Some(n),
        }
    }
}

/// Enumeration state threaded through `stream::unfold`.
struct Pager {
    enumerator: Arc<TargetEnumerator>,
    /// Cursor of the next page to fetch.
    cursor: ListingCursor,
    seen: HashSet<String>,
    buffer: VecDeque<CrawlTarget>,
    pages_fetched: u32,
    yielded: usize,
    done: bool,
    cancel: CancellationToken,
}

impl Pager {
    /// Queue the unseen links of the page at `self.cursor` and advance.
    /// Returns how many were new.
    fn absorb(&mut self, links: Vec<ListingLink>) -> usize {
        let origin = self.cursor.clone();
        let before = self.buffer.len();
        for link in links {
            if self.seen.insert(link.key) {
                self.buffer.push_back(CrawlTarget::Product {
                    url: link.url,
                    origin: Some(origin.clone()),
                });
            }
        }
        self.cursor = origin.next();
        self.pages_fetched += 1;
        self.buffer.len() - before
    }

    fn exhausted(&self) -> bool {
        self.enumerator
            .max_targets()
            .is_some_and(|max| self.yielded >= max)
    }

    async fn next_target(mut self) -> Option<(CrawlTarget, Self)> {
        loop {
            if self.exhausted() {
                return None;
            }
            // targets already listed are still yielded after a stop so the
            // consumer can account for them as skipped
            if let Some(target) = self.buffer.pop_front() {
                self.yielded += 1;
                return Some((target, self));
            }
            if self.done
                || self.cancel.is_cancelled()
                || self.pages_fetched >= self.enumerator.catalog.max_listing_pages
            {
                return None;
            }

            let cursor = self.cursor.clone();
            match self.enumerator.listing_page(&cursor, &self.cancel).await {
                Ok(links) => {
                    if self.absorb(links) == 0 {
                        debug!(category = %cursor.category, page = cursor.page, "No new links, enumeration complete");
                        self.done = true;
                    }
                }
                Err(e) if e.is_cancelled() => return None,
                Err(e) => {
                    warn!(category = %cursor.category, page = cursor.page, error = %e, "⚠️ Listing page failed, ending enumeration");
                    self.done = true;
                }
            }
        }
    }
}
