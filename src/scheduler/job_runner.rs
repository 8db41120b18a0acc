//! Drives one job run over its targets with bounded concurrency and a
//! run deadline.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::crawling::enumerator::TargetEnumerator;
use crate::crawling::pipeline::{CrawlPipeline, TargetOutcome};
use crate::domain::crawl_target::{CategoryId, CrawlTarget, product_key};
use crate::domain::job::{JobKind, JobStatus, RunCounts};
use crate::error::StoreError;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::product_repository::ProductRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub concurrency_limit: usize,
    pub run_deadline: Duration,
    /// Category codes of the catalogue.
    pub categories: Vec<String>,
    /// Categories sampled per run; 0 = all.
    pub categories_per_run: usize,
}

impl From<&AppConfig> for RunSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency_limit: config.crawler.concurrency_limit,
            run_deadline: config.crawler.run_deadline(),
            categories: config.catalog.category_codes(),
            categories_per_run: config.catalog.categories_per_run,
        }
    }
}

/// What a run produced, before it is written back to its `JobRun`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: JobStatus,
    pub counts: RunCounts,
    pub enumeration_failures: u32,
    /// Failure label → number of targets.
    pub failures: BTreeMap<&'static str, u32>,
    pub deadline_reached: bool,
}

impl RunReport {
    fn new(counts: RunCounts, enumeration_failures: u32, failures: BTreeMap<&'static str, u32>, deadline_reached: bool) -> Self {
        Self {
            status: JobStatus::classify(&counts, enumeration_failures),
            counts,
            enumeration_failures,
            failures,
            deadline_reached,
        }
    }

    /// Summary stored in `job_runs.detail`; `None` for a clean run.
    pub fn detail(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.failures.is_empty() {
            let failures: Vec<String> = self.failures.iter().map(|(k, v)| format!("{k}={v}")).collect();
            parts.push(format!("failures: {}", failures.join(", ")));
        }
        if self.enumeration_failures > 0 {
            parts.push(format!("enumeration failures: {}", self.enumeration_failures));
        }
        if self.deadline_reached {
            parts.push("run deadline reached".to_string());
        }
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// Collects per-target outcomes from concurrent workers.
#[derive(Default)]
struct Tally {
    counts: RunCounts,
    failures: BTreeMap<&'static str, u32>,
}

impl Tally {
    fn record(&mut self, outcome: &TargetOutcome) {
        outcome.record(&mut self.counts);
        if let TargetOutcome::Failed(failure) = outcome {
            *self.failures.entry(failure.category()).or_default() += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        self.counts.attempted += other.counts.attempted;
        self.counts.succeeded += other.counts.succeeded;
        self.counts.failed += other.counts.failed;
        self.counts.skipped += other.counts.skipped;
        self.counts.history_written += other.counts.history_written;
        for (label, n) in other.failures {
            *self.failures.entry(label).or_default() += n;
        }
    }
}

pub struct JobRunner {
    pipeline: Arc<CrawlPipeline>,
    enumerator: Arc<TargetEnumerator>,
    products: ProductRepository,
    settings: RunSettings,
}

impl JobRunner {
    pub fn new(
        pipeline: Arc<CrawlPipeline>,
        enumerator: Arc<TargetEnumerator>,
        products: ProductRepository,
        settings: RunSettings,
    ) -> Self {
        Self {
            pipeline,
            enumerator,
            products,
            settings,
        }
    }

    pub const fn pipeline(&self) -> &Arc<CrawlPipeline> {
        &self.pipeline
    }

    pub const fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one run of `kind`. `stop` aborts the run early; the run
    /// deadline is applied on top of it.
    pub async fn run(&self, kind: JobKind, stop: &CancellationToken) -> Result<RunReport, StoreError> {
        let token = stop.child_token();
        let deadline = {
            let token = token.clone();
            let limit = self.settings.run_deadline;
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(limit) => {
                        warn!(deadline_secs = limit.as_secs(), "⏰ Run deadline reached, abandoning remaining targets");
                        token.cancel();
                    }
                    () = token.cancelled() => {}
                }
            })
        };

        let result = match kind {
            JobKind::CategoryRefresh => Ok(self.run_categories(&token).await),
            JobKind::ProductRefresh => self.run_products(&token).await,
        };

        let deadline_reached = token.is_cancelled() && !stop.is_cancelled();
        deadline.abort();
        let (tally, enumeration_failures) = result?;
        Ok(RunReport::new(tally.counts, enumeration_failures, tally.failures, deadline_reached))
    }

    async fn run_categories(&self, token: &CancellationToken) -> (Tally, u32) {
        let categories = self.sample_categories();
        info!(categories = ?categories, "🗂️ Category refresh started");

        let mut tally = Tally::default();
        let mut enumeration_failures = 0;
        // a product listed in two categories is crawled once per run
        let seen: Arc<Mutex<HashSet<String>>> = Arc::default();

        for code in categories {
            if token.is_cancelled() {
                break;
            }
            let targets = match self.enumerator.enumerate(CategoryId::new(code), None, token.clone()).await {
                Ok(targets) => targets,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(error = %e, "❌ Category enumeration failed");
                    enumeration_failures += 1;
                    continue;
                }
            };

            let seen = Arc::clone(&seen);
            let fresh = targets.filter(move |target| {
                let keep = match target {
                    CrawlTarget::Product { url, .. } => seen
                        .lock()
                        .map_or(true, |mut seen| seen.insert(product_key(url))),
                    CrawlTarget::CategoryPage(_) => true,
                };
                future::ready(keep)
            });
            tally.merge(self.drive(fresh, token).await);
        }
        (tally, enumeration_failures)
    }

    async fn run_products(&self, token: &CancellationToken) -> Result<(Tally, u32), StoreError> {
        let products = self.products.list_active_products().await?;
        info!(products = products.len(), "🔁 Product refresh started");

        let mut tally = Tally::default();
        let mut targets = Vec::with_capacity(products.len());
        for product in products {
            match Url::parse(&product.source_url) {
                Ok(url) => targets.push(CrawlTarget::product(url)),
                Err(e) => {
                    warn!(product = %product.id, url = %product.source_url, error = %e, "❌ Stored product URL is invalid");
                    tally.counts.record_failure();
                    *tally.failures.entry("invalid_url").or_default() += 1;
                }
            }
        }

        tally.merge(self.drive(stream::iter(targets), token).await);
        Ok((tally, 0))
    }

    /// Process targets with at most `concurrency_limit` in flight. Targets
    /// pulled after cancellation are recorded as skipped.
    async fn drive<S>(&self, targets: S, token: &CancellationToken) -> Tally
    where
        S: Stream<Item = CrawlTarget>,
    {
        let tally = Arc::new(Mutex::new(Tally::default()));
        targets
            .for_each_concurrent(self.settings.concurrency_limit.max(1), |target| {
                let pipeline = Arc::clone(&self.pipeline);
                let token = token.clone();
                let tally = Arc::clone(&tally);
                async move {
                    let outcome = pipeline.process(&target, &token).await;
                    if let Ok(mut tally) = tally.lock() {
                        tally.record(&outcome);
                    }
                }
            })
            .await;
        let mut tally = tally.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        std::mem::take(&mut *tally)
    }

    fn sample_categories(&self) -> Vec<String> {
        let all = &self.settings.categories;
        let take = self.settings.categories_per_run;
        if take == 0 || take >= all.len() {
            return all.clone();
        }
        let mut picked = fastrand::choose_multiple(all.iter().cloned(), take);
        picked.sort();
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_lists_failure_labels() {
        let mut failures = BTreeMap::new();
        failures.insert("extraction", 1);
        failures.insert("fetch.timeout", 2);
        let counts = RunCounts {
            attempted: 5,
            succeeded: 2,
            failed: 3,
            skipped: 1,
            history_written: 2,
        };
        let report = RunReport::new(counts, 1, failures, true);

        assert_eq!(report.status, JobStatus::PartialFailure);
        assert_eq!(
            report.detail().as_deref(),
            Some("failures: extraction=1, fetch.timeout=2; enumeration failures: 1; run deadline reached")
        );
    }

    #[test]
    fn clean_reports_have_no_detail() {
        let counts = RunCounts {
            attempted: 1,
            succeeded: 1,
            history_written: 1,
            ..RunCounts::default()
        };
        let report = RunReport::new(counts, 0, BTreeMap::new(), false);
        assert_eq!(report.status, JobStatus::Succeeded);
        assert_eq!(report.detail(), None);
    }
}
