//! Page fetcher: one governed, time-boxed page load.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::crawling::governor::Governor;
use crate::domain::crawl_target::PageKind;
use crate::error::{FetchError, FetchErrorKind};
use crate::infrastructure::page_loader::{LoadedPage, PageLoader};

/// Raw content of a fetched page. Content shape is not checked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// URL that was requested.
    pub url: String,
    pub final_url: String,
    pub kind: PageKind,
    pub status: Option<u16>,
    pub content: String,
    /// Whether the readiness condition for `kind` was met before the timeout.
    pub ready: bool,
}

pub struct PageFetcher {
    loader: Arc<dyn PageLoader>,
    governor: Arc<Governor>,
    per_target_timeout: Duration,
}

impl PageFetcher {
    pub fn new(loader: Arc<dyn PageLoader>, governor: Arc<Governor>, per_target_timeout: Duration) -> Self {
        Self {
            loader,
            governor,
            per_target_timeout,
        }
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    /// Fetch `url` through a governor slot. Retryable failures are retried
    /// by the governor; the slot is released on every exit path.
    pub async fn fetch(&self, url: &str, kind: PageKind, cancel: &CancellationToken) -> Result<FetchedPage, FetchError> {
        let site = site_of(url);
        let page = self
            .governor
            .run(url, &site, cancel, || self.load_once(url, kind))
            .await?;

        if !page.ready {
            warn!(url, kind = %kind, "⚠️ Readiness marker not found, returning content as is");
        }
        Ok(FetchedPage {
            url: url.to_string(),
            final_url: page.final_url,
            kind,
            status: page.status,
            content: page.content,
            ready: page.ready,
        })
    }

    async fn load_once(&self, url: &str, kind: PageKind) -> Result<LoadedPage, FetchError> {
        let page = tokio::time::timeout(
            self.per_target_timeout,
            self.loader.load(url, kind, self.per_target_timeout),
        )
        .await
        .map_err(|_| {
            FetchError::timeout(
                url,
                format!("no response within {}s", self.per_target_timeout.as_secs_f32()),
            )
        })??;

        if let Some(kind) = page.status.and_then(FetchErrorKind::from_status) {
            let status = page.status.unwrap_or_default();
            return Err(FetchError::new(kind, url, format!("HTTP {status}")));
        }
        debug!(url, loader = self.loader.name(), status = ?page.status, "📄 Page loaded");
        Ok(page)
    }
}

/// Pacing key: the host of `url`.
fn site_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}
