//! Job scheduler.
//!
//! Per job kind: `Idle → Running → {Succeeded, PartialFailure, Failed} → Idle`.
//! The `Running` flag is the persisted `job_runs` row itself; claiming it is a
//! single insert guarded by a partial unique index, so manual and timer
//! triggers race safely and a restart never loses track of it. Rows left
//! `running` by a crash are recovered on [`JobScheduler::start`].

pub mod job_runner;

pub use job_runner::{JobRunner, RunReport, RunSettings};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::crawling::enumerator::TargetEnumerator;
use crate::crawling::extractor::Extractor;
use crate::crawling::fetcher::PageFetcher;
use crate::crawling::governor::{Governor, GovernorSettings};
use crate::crawling::pipeline::{CrawlPipeline, TargetOutcome};
use crate::crawling::writer::ChangeAwareWriter;
use crate::domain::events::{RunCompleted, RunEventBus};
use crate::domain::job::{JobKind, JobRun, JobState, JobStatus, RunCounts};
use crate::error::SchedulerError;
use crate::infrastructure::config::{AppConfig, SchedulerConfig};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::job_run_repository::JobRunRepository;
use crate::infrastructure::page_loader::PageLoader;
use crate::infrastructure::product_repository::ProductRepository;

const MIN_TIMER_PERIOD: Duration = Duration::from_secs(1);

struct SchedulerInner {
    runner: JobRunner,
    runs: JobRunRepository,
    products: ProductRepository,
    events: RunEventBus,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    /// Wire the crawl pipeline for `config` on top of `database` and `loader`.
    pub fn new(config: &AppConfig, database: &DatabaseConnection, loader: Arc<dyn PageLoader>) -> Result<Self, SchedulerError> {
        let pool = Arc::new(database.pool().clone());
        let governor = Governor::shared(GovernorSettings::from(&config.crawler));
        let fetcher = Arc::new(PageFetcher::new(loader, governor, config.crawler.per_target_timeout()));
        let extractor = Arc::new(
            Extractor::new(&config.catalog.base_url).map_err(|e| SchedulerError::Configuration(e.to_string()))?,
        );
        let products = ProductRepository::new(Arc::clone(&pool));
        let writer = Arc::new(ChangeAwareWriter::new(products.clone()));
        let pipeline = Arc::new(CrawlPipeline::new(Arc::clone(&fetcher), Arc::clone(&extractor), writer));
        let enumerator = Arc::new(TargetEnumerator::new(fetcher, extractor, config.catalog.clone()));
        let runner = JobRunner::new(pipeline, enumerator, products.clone(), RunSettings::from(config));

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                runner,
                runs: JobRunRepository::new(pool),
                products,
                events: RunEventBus::default(),
                config: config.scheduler.clone(),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Recover stale runs, then start the interval timers of enabled kinds.
    /// Returns the recovered runs.
    pub async fn start(&self) -> Result<Vec<JobRun>, SchedulerError> {
        let recovered = self.recover_stale_runs().await?;
        for kind in JobKind::ALL {
            self.spawn_timer(kind);
        }
        info!(recovered = recovered.len(), "⏱️ Job scheduler started");
        Ok(recovered)
    }

    /// Mark `running` rows older than the grace period as failed.
    pub async fn recover_stale_runs(&self) -> Result<Vec<JobRun>, SchedulerError> {
        let now = Utc::now();
        let grace = chrono::Duration::from_std(self.inner.config.stale_run_grace())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Ok(self.inner.runs.recover_stale(now - grace, now).await?)
    }

    /// Start a run of `kind` in the background. Returns the `Running` row,
    /// or [`SchedulerError::AlreadyRunning`] when one is in flight.
    pub async fn trigger_job(&self, kind: JobKind) -> Result<JobRun, SchedulerError> {
        let run = self.inner.claim(kind).await?;
        let inner = Arc::clone(&self.inner);
        let started = run.clone();
        self.inner.track(tokio::spawn(async move {
            SchedulerInner::execute(inner, started).await;
        }));
        Ok(run)
    }

    /// Run `kind` to completion and return the finalized run.
    pub async fn run_job(&self, kind: JobKind) -> Result<JobRun, SchedulerError> {
        let run = self.inner.claim(kind).await?;
        Ok(SchedulerInner::execute(Arc::clone(&self.inner), run).await)
    }

    pub async fn job_status(&self, kind: JobKind) -> Result<JobState, SchedulerError> {
        Ok(JobState::from_latest(self.inner.runs.latest(kind).await?))
    }

    /// Crawl one product page outside any job run. Safe to race with a
    /// scheduled run: writes for the same product are serialized.
    pub async fn refresh_product(&self, url: &Url) -> TargetOutcome {
        info!(url = %url, "🔎 Manual product refresh");
        self.inner
            .runner
            .pipeline()
            .process_product(url, &self.inner.shutdown)
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunCompleted> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> &RunEventBus {
        &self.inner.events
    }

    pub fn governor(&self) -> &Arc<Governor> {
        self.inner.runner.pipeline().governor()
    }

    pub fn products(&self) -> &ProductRepository {
        &self.inner.products
    }

    pub fn runs(&self) -> &JobRunRepository {
        &self.inner.runs
    }

    /// Stop timers, abandon in-flight targets and wait for running jobs to
    /// finalize.
    pub async fn shutdown(&self) {
        info!("🛑 Job scheduler shutting down");
        self.inner.shutdown.cancel();
        let tasks = match self.inner.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
    }

    fn spawn_timer(&self, kind: JobKind) {
        let schedule = self.inner.config.jobs.schedule(kind);
        if !schedule.enabled {
            debug!(kind = %kind, "Timer disabled");
            return;
        }
        let period = schedule.interval().max(MIN_TIMER_PERIOD);
        let first = if self.inner.config.run_on_startup {
            Instant::now()
        } else {
            Instant::now() + period
        };

        let inner = Arc::clone(&self.inner);
        let scheduler = self.clone();
        self.inner.track(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match scheduler.trigger_job(kind).await {
                    Ok(run) => info!(kind = %kind, run_id = %run.id, "⏰ Timer triggered job"),
                    Err(SchedulerError::AlreadyRunning(_)) => {
                        debug!(kind = %kind, "Previous run still in flight, tick skipped");
                    }
                    Err(e) => warn!(kind = %kind, error = %e, "⚠️ Timer trigger failed"),
                }
            }
        }));
        info!(kind = %kind, interval_secs = period.as_secs(), "⏱️ Timer armed");
    }
}

impl SchedulerInner {
    /// The `Idle → Running` transition.
    async fn claim(&self, kind: JobKind) -> Result<JobRun, SchedulerError> {
        if !self.config.jobs.schedule(kind).enabled {
            return Err(SchedulerError::Disabled { kind });
        }
        let run = JobRun::start(kind, Utc::now());
        if !self.runs.insert_running(&run).await? {
            debug!(kind = %kind, "Trigger rejected: already running");
            return Err(SchedulerError::AlreadyRunning(kind));
        }
        info!(kind = %kind, run_id = %run.id, "▶️ Job run started");
        Ok(run)
    }

    /// Drive the run and finalize it exactly once, whatever happens to the
    /// run body.
    async fn execute(inner: Arc<Self>, run: JobRun) -> JobRun {
        let kind = run.kind;
        let body = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.runner.run(kind, &inner.shutdown).await })
        };

        let finished = match body.await {
            Ok(Ok(report)) => {
                let detail = report.detail();
                run.finish(report.status, report.counts, detail, Utc::now())
            }
            Ok(Err(e)) => {
                error!(kind = %kind, error = %e, "❌ Job run could not load its targets");
                run.finish(JobStatus::Failed, RunCounts::default(), Some(format!("storage failure: {e}")), Utc::now())
            }
            Err(e) => {
                let detail = if e.is_panic() { "run panicked" } else { "run aborted" };
                error!(kind = %kind, error = %e, "💥 Job run crashed");
                run.finish(JobStatus::Failed, RunCounts::default(), Some(detail.to_string()), Utc::now())
            }
        };

        match inner.runs.finalize(&finished).await {
            Ok(true) => {}
            Ok(false) => warn!(run_id = %finished.id, "Run was already finalized elsewhere"),
            Err(e) => error!(run_id = %finished.id, error = %e, "❌ Failed to finalize run; stale recovery will reclaim it"),
        }

        let counts = finished.counts;
        info!(
            kind = %kind,
            run_id = %finished.id,
            status = %finished.status,
            attempted = counts.attempted,
            succeeded = counts.succeeded,
            failed = counts.failed,
            skipped = counts.skipped,
            history_written = counts.history_written,
            elapsed_ms = finished.elapsed_ms().unwrap_or_default(),
            "🏁 Job run finished"
        );
        if let Some(event) = RunCompleted::from_run(&finished) {
            inner.events.publish(event);
        }
        finished
    }

    fn track(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|task| !task.is_finished());
            tasks.push(handle);
        }
    }
}
