//! Headless Chromium loader (cargo feature `browser`).
//!
//! One browser process is shared; every load opens its own tab, which a
//! [`PageGuard`] closes on every exit path.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::crawl_target::PageKind;
use crate::error::FetchError;
use crate::infrastructure::config::CrawlerConfig;
use crate::infrastructure::page_loader::{LoadedPage, PageLoader};

const READINESS_POLL: Duration = Duration::from_millis(250);

/// Closes the tab when dropped. `close()` is the awaited path; `Drop`
/// spawns the close on the current runtime.
struct PageGuard {
    page: Option<Page>,
    url: String,
}

impl PageGuard {
    fn new(page: Page, url: &str) -> Self {
        Self {
            page: Some(page),
            url: url.to_string(),
        }
    }

    fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                warn!("Failed to close tab for {}: {}", self.url, e);
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        let url = std::mem::take(&mut self.url);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = page.close().await {
                    warn!("Tab cleanup failed for {}: {}", url, e);
                }
            });
        }
    }
}

pub struct BrowserPageLoader {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserPageLoader {
    pub async fn launch(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let browser_config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", config.user_agent))
            .arg("--lang=ko-KR")
            .request_timeout(config.per_target_timeout())
            .build()
            .map_err(|e| FetchError::network("-", format!("invalid browser config: {e}")))?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::network("-", format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        debug!("🧭 Headless browser launched");
        Ok(Self { browser, handler })
    }

    async fn wait_for_selector(page: &Page, selector: &str, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if page.find_element(selector).await.is_ok() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    async fn load_in(guard: &PageGuard, url: &str, kind: PageKind, wait: Duration) -> Result<LoadedPage, FetchError> {
        let Some(page) = guard.page() else {
            return Err(FetchError::network(url, "tab already closed"));
        };
        page.goto(url)
            .await
            .map_err(|e| FetchError::network(url, format!("navigation failed: {e}")))?;

        let ready = Self::wait_for_selector(page, kind.readiness_selector(), wait).await;
        let content = page
            .content()
            .await
            .map_err(|e| FetchError::network(url, format!("failed to read DOM: {e}")))?;
        let ready = ready && content.contains(kind.readiness_marker());
        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.to_string());

        Ok(LoadedPage {
            final_url,
            status: None,
            content,
            ready,
        })
    }
}

#[async_trait]
impl PageLoader for BrowserPageLoader {
    async fn load(&self, url: &str, kind: PageKind, wait: Duration) -> Result<LoadedPage, FetchError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::network(url, format!("failed to open tab: {e}")))?;
        let guard = PageGuard::new(page, url);

        let result = Self::load_in(&guard, url, kind, wait).await;
        guard.close().await;
        result
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

impl Drop for BrowserPageLoader {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
