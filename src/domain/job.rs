//! Job kinds, run records and the per-kind state machine
//! `Idle → Running → {Succeeded, PartialFailure, Failed} → Idle`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named recurring task with its own schedule and running flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Enumerate sampled categories and crawl the products they list.
    CategoryRefresh,
    /// Re-crawl every active product already in the catalog.
    ProductRefresh,
}

impl JobKind {
    pub const ALL: [Self; 2] = [Self::CategoryRefresh, Self::ProductRefresh];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CategoryRefresh => "category_refresh",
            Self::ProductRefresh => "product_refresh",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category_refresh" => Ok(Self::CategoryRefresh),
            "product_refresh" => Ok(Self::ProductRefresh),
            other => Err(format!("Invalid JobKind: {other}")),
        }
    }
}

/// Persisted status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    PartialFailure,
    Failed,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Outcome of a finished run.
    ///
    /// * no targets at all and at least one enumeration failure → `Failed`
    /// * every produced target succeeded and no category failed → `Succeeded`
    /// * anything else (failed or skipped targets, lost categories) → `PartialFailure`
    pub const fn classify(counts: &RunCounts, enumeration_failures: u32) -> Self {
        let produced = counts.attempted + counts.skipped;
        if produced == 0 {
            return if enumeration_failures > 0 {
                Self::Failed
            } else {
                Self::Succeeded
            };
        }
        if counts.failed == 0 && counts.skipped == 0 && enumeration_failures == 0 {
            Self::Succeeded
        } else {
            Self::PartialFailure
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "partial_failure" => Ok(Self::PartialFailure),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Invalid JobStatus: {other}")),
        }
    }
}

/// Per-run target counters. `attempted = succeeded + failed`; skipped
/// targets were never started (deadline or stop) and are not attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Successful targets that produced a new history entry.
    pub history_written: u32,
}

impl RunCounts {
    pub fn record_success(&mut self, history_written: bool) {
        self.attempted += 1;
        self.succeeded += 1;
        if history_written {
            self.history_written += 1;
        }
    }

    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }
}

/// One execution of a job kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    /// Free-form summary: failure categories, recovery note, panic message.
    pub detail: Option<String>,
}

impl JobRun {
    pub fn start(kind: JobKind, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Running,
            started_at,
            finished_at: None,
            counts: RunCounts::default(),
            detail: None,
        }
    }

    #[must_use]
    pub fn finish(
        self,
        status: JobStatus,
        counts: RunCounts,
        detail: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        debug_assert!(status.is_terminal());
        Self {
            status,
            finished_at: Some(finished_at),
            counts,
            detail,
            ..self
        }
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// What `job_status` reports for a kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "run", rename_all = "snake_case")]
pub enum JobState {
    /// Never run.
    Idle,
    Running(JobRun),
    /// Idle again; carries the last outcome.
    Finished(JobRun),
}

impl JobState {
    pub fn from_latest(latest: Option<JobRun>) -> Self {
        match latest {
            None => Self::Idle,
            Some(run) if run.status == JobStatus::Running => Self::Running(run),
            Some(run) => Self::Finished(run),
        }
    }

    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running(_))
    }
}
