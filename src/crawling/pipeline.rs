//! Per-target pipeline: fetch → extract → write, folded into one outcome.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::crawling::extractor::Extractor;
use crate::crawling::fetcher::PageFetcher;
use crate::crawling::governor::Governor;
use crate::crawling::writer::{ChangeAwareWriter, WriteOutcome};
use crate::domain::crawl_target::{CrawlTarget, PageKind};
use crate::domain::job::RunCounts;
use crate::error::{ExtractionError, TargetFailure};

/// How one target ended.
#[derive(Debug)]
pub enum TargetOutcome {
    Written(WriteOutcome),
    Failed(TargetFailure),
    /// Abandoned by deadline or stop before completing; not a failure.
    Skipped,
}

impl TargetOutcome {
    /// Fold into run counters.
    pub fn record(&self, counts: &mut RunCounts) {
        match self {
            Self::Written(outcome) => counts.record_success(outcome.history_written),
            Self::Failed(_) => counts.record_failure(),
            Self::Skipped => counts.record_skip(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Written(_))
    }
}

pub struct CrawlPipeline {
    fetcher: Arc<PageFetcher>,
    extractor: Arc<Extractor>,
    writer: Arc<ChangeAwareWriter>,
}

impl CrawlPipeline {
    pub fn new(fetcher: Arc<PageFetcher>, extractor: Arc<Extractor>, writer: Arc<ChangeAwareWriter>) -> Self {
        Self {
            fetcher,
            extractor,
            writer,
        }
    }

    pub fn fetcher(&self) -> &Arc<PageFetcher> {
        &self.fetcher
    }

    pub fn extractor(&self) -> &Arc<Extractor> {
        &self.extractor
    }

    pub fn writer(&self) -> &Arc<ChangeAwareWriter> {
        &self.writer
    }

    pub fn governor(&self) -> &Arc<Governor> {
        self.fetcher.governor()
    }

    /// Process one product target. Listing pages belong to the enumerator
    /// and are rejected here.
    pub async fn process(&self, target: &CrawlTarget, cancel: &CancellationToken) -> TargetOutcome {
        match target {
            CrawlTarget::Product { url, .. } => self.process_product(url, cancel).await,
            CrawlTarget::CategoryPage(_) => TargetOutcome::Failed(
                ExtractionError::invalid("target", format!("{} is a listing page", target.label())).into(),
            ),
        }
    }

    pub async fn process_product(&self, url: &Url, cancel: &CancellationToken) -> TargetOutcome {
        if cancel.is_cancelled() {
            return TargetOutcome::Skipped;
        }

        let page = match self.fetcher.fetch(url.as_str(), PageKind::Detail, cancel).await {
            Ok(page) => page,
            Err(e) if e.is_cancelled() => {
                debug!(url = %url, "⏭️ Target skipped: run stopped");
                return TargetOutcome::Skipped;
            }
            Err(e) => return Self::failed(url, e.into()),
        };

        let snapshot = match self.extractor.snapshot(&page.content, url, Utc::now()) {
            Ok(snapshot) => snapshot,
            Err(e) => return Self::failed(url, e.into()),
        };

        match self.writer.write(&snapshot).await {
            Ok(outcome) => TargetOutcome::Written(outcome),
            Err(e) => Self::failed(url, e.into()),
        }
    }

    fn failed(url: &Url, failure: TargetFailure) -> TargetOutcome {
        warn!(url = %url, category = failure.category(), error = %failure, "❌ Target failed");
        TargetOutcome::Failed(failure)
    }
}
