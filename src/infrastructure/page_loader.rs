//! Page loading seam.
//!
//! A [`PageLoader`] is one way of turning a URL into rendered page text:
//! plain HTTP ([`HttpPageLoader`]), captured pages ([`ReplayPageLoader`]) or
//! a headless browser (`BrowserPageLoader`, cargo feature `browser`). The
//! fetcher owns timeouts, slots and status classification; loaders only load.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::domain::crawl_target::PageKind;
use crate::error::{FetchError, FetchErrorKind};
use crate::infrastructure::config::CrawlerConfig;

/// What a loader saw at the end of navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage {
    /// URL after redirects.
    pub final_url: String,
    /// HTTP status when the transport exposes it.
    pub status: Option<u16>,
    pub content: String,
    /// Whether the page kind's readiness marker appeared in time.
    pub ready: bool,
}

#[async_trait]
pub trait PageLoader: Send + Sync {
    /// Load `url` and wait up to `wait` for `kind`'s readiness condition.
    async fn load(&self, url: &str, kind: PageKind, wait: Duration) -> Result<LoadedPage, FetchError>;

    fn name(&self) -> &'static str;
}

/// Plain HTTP loader. Suitable when the product state is server-rendered
/// into the page, which is the case for the store's detail pages.
pub struct HttpPageLoader {
    client: Client,
}

impl HttpPageLoader {
    pub fn new(config: &CrawlerConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| FetchError::network("-", format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.per_target_timeout())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::network("-", format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn classify(url: &str, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::timeout(url, error.to_string())
        } else {
            FetchError::network(url, error.to_string())
        }
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load(&self, url: &str, kind: PageKind, _wait: Duration) -> Result<LoadedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::classify(url, &e))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content = response.text().await.map_err(|e| Self::classify(url, &e))?;
        let ready = content.contains(kind.readiness_marker());
        debug!(url, status, bytes = content.len(), ready, "HTTP page loaded");

        Ok(LoadedPage {
            final_url,
            status: Some(status),
            content,
            ready,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// One scripted answer of the replay loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayResponse {
    Page { status: u16, body: String },
    Fail(FetchErrorKind),
    /// Never completes; exercises timeouts and cancellation.
    Hang,
}

#[derive(Debug, Default)]
struct Route {
    script: VecDeque<ReplayResponse>,
    fallback: Option<ReplayResponse>,
    hits: u32,
}

/// Serves captured pages from memory or from a capture directory, with
/// optional scripted failures and artificial latency.
#[derive(Debug, Default)]
pub struct ReplayPageLoader {
    routes: Mutex<HashMap<String, Route>>,
    capture_dir: Option<PathBuf>,
    latency: Duration,
}

/// File name a capture of `url` is stored under.
pub fn capture_file_name(url: &str) -> String {
    let stem: String = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{stem}.html")
}

impl ReplayPageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages not registered in memory are read from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            capture_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_page(self, url: &str, html: impl Into<String>) -> Self {
        self.set_page(url, 200, html);
        self
    }

    #[must_use]
    pub fn with_status(self, url: &str, status: u16, body: impl Into<String>) -> Self {
        self.set_page(url, status, body);
        self
    }

    /// The next `times` loads of `url` fail with `kind` before the regular
    /// answer is served.
    #[must_use]
    pub fn with_failures(self, url: &str, kind: FetchErrorKind, times: u32) -> Self {
        self.script(url, std::iter::repeat_n(ReplayResponse::Fail(kind), times as usize));
        self
    }

    #[must_use]
    pub fn with_hang(self, url: &str) -> Self {
        self.set_response(url, ReplayResponse::Hang);
        self
    }

    /// Replace the regular answer for `url`. Usable while loads are running.
    pub fn set_page(&self, url: &str, status: u16, body: impl Into<String>) {
        self.set_response(
            url,
            ReplayResponse::Page {
                status,
                body: body.into(),
            },
        );
    }

    pub fn set_response(&self, url: &str, response: ReplayResponse) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.entry(url.to_string()).or_default().fallback = Some(response);
        }
    }

    /// Queue one-shot answers served before the regular one.
    pub fn script(&self, url: &str, responses: impl IntoIterator<Item = ReplayResponse>) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.entry(url.to_string()).or_default().script.extend(responses);
        }
    }

    /// How many times `url` was requested.
    pub fn hit_count(&self, url: &str) -> u32 {
        self.routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(url).map(|r| r.hits))
            .unwrap_or(0)
    }

    fn next_response(&self, url: &str) -> Option<ReplayResponse> {
        let mut routes = self.routes.lock().ok()?;
        let route = routes.entry(url.to_string()).or_default();
        route.hits += 1;
        route.script.pop_front().or_else(|| route.fallback.clone())
    }

    async fn read_capture(&self, url: &str) -> Option<String> {
        let dir = self.capture_dir.as_ref()?;
        tokio::fs::read_to_string(dir.join(capture_file_name(url))).await.ok()
    }
}

#[async_trait]
impl PageLoader for ReplayPageLoader {
    async fn load(&self, url: &str, kind: PageKind, _wait: Duration) -> Result<LoadedPage, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let response = match self.next_response(url) {
            Some(response) => response,
            None => match self.read_capture(url).await {
                Some(body) => ReplayResponse::Page { status: 200, body },
                None => ReplayResponse::Page {
                    status: 404,
                    body: String::new(),
                },
            },
        };

        match response {
            ReplayResponse::Page { status, body } => Ok(LoadedPage {
                final_url: url.to_string(),
                status: Some(status),
                ready: body.contains(kind.readiness_marker()),
                content: body,
            }),
            ReplayResponse::Fail(kind) => Err(FetchError::new(kind, url, "scripted failure")),
            ReplayResponse::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}
