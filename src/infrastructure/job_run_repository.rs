//! Persisted job runs.
//!
//! The `job_runs` table is the single source of truth for "is this job kind
//! running". A partial unique index on `(kind) WHERE status = 'running'`
//! makes [`JobRunRepository::insert_running`] the atomic `Idle → Running`
//! transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::domain::job::{JobKind, JobRun, JobStatus, RunCounts};
use crate::error::StoreError;

const RUN_COLUMNS: &str = "id, kind, status, started_at, finished_at, attempted, succeeded, failed, \
     skipped, history_written, detail";

#[derive(Clone)]
pub struct JobRunRepository {
    pool: Arc<SqlitePool>,
}

impl JobRunRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Insert a fresh `running` row. Returns `false` when another run of the
    /// same kind already holds the running flag.
    pub async fn insert_running(&self, run: &JobRun) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO job_runs (id, kind, status, started_at) VALUES (?, ?, 'running', ?)",
        )
        .bind(run.id.to_string())
        .bind(run.kind.as_str())
        .bind(run.started_at)
        .execute(&*self.pool)
        .await
        .map_err(StoreError::from);

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write the terminal state of a run. Only a row still `running` is
    /// updated, so a run is finalized at most once; returns whether it was.
    pub async fn finalize(&self, run: &JobRun) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE job_runs
            SET status = ?, finished_at = ?, attempted = ?, succeeded = ?, failed = ?,
                skipped = ?, history_written = ?, detail = ?
            WHERE id = ? AND status = 'running'
            ",
        )
        .bind(run.status.as_str())
        .bind(run.finished_at)
        .bind(i64::from(run.counts.attempted))
        .bind(i64::from(run.counts.succeeded))
        .bind(i64::from(run.counts.failed))
        .bind(i64::from(run.counts.skipped))
        .bind(i64::from(run.counts.history_written))
        .bind(run.detail.as_deref())
        .bind(run.id.to_string())
        .execute(&*self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<JobRun>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// The running row of a kind, if any.
    pub async fn running(&self, kind: JobKind) -> Result<Option<JobRun>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE kind = ? AND status = 'running'");
        let row = sqlx::query(&sql)
            .bind(kind.as_str())
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Most recently started run of a kind.
    pub async fn latest(&self, kind: JobKind) -> Result<Option<JobRun>, StoreError> {
        Ok(self.recent(kind, 1).await?.into_iter().next())
    }

    pub async fn recent(&self, kind: JobKind, limit: u32) -> Result<Vec<JobRun>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE kind = ? ORDER BY rowid DESC LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(i64::from(limit))
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Reclassify `running` rows started before `cutoff` as failed.
    /// Returns the recovered runs.
    pub async fn recover_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<JobRun>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE status = 'running'");
        let rows = sqlx::query(&sql).fetch_all(&*self.pool).await?;

        let mut recovered = Vec::new();
        for row in &rows {
            let run = run_from_row(row)?;
            if run.started_at >= cutoff {
                continue;
            }
            let detail = format!(
                "recovered: still running at {} (started {})",
                now.to_rfc3339(),
                run.started_at.to_rfc3339()
            );
            let counts = run.counts;
            let failed = run.finish(JobStatus::Failed, counts, Some(detail), now);
            if self.finalize(&failed).await? {
                warn!(run_id = %failed.id, kind = %failed.kind, "♻️ Stale running job recovered as failed");
                recovered.push(failed);
            }
        }
        Ok(recovered)
    }
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::CorruptRow {
        table: "job_runs",
        reason: reason.into(),
    }
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|e| corrupt(format!("{column}: {e}")))
}

fn run_from_row(row: &SqliteRow) -> Result<JobRun, StoreError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(JobRun {
        id: Uuid::parse_str(&id).map_err(|e| corrupt(format!("id: {e}")))?,
        kind: kind.parse().map_err(corrupt)?,
        status: status.parse().map_err(corrupt)?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        counts: RunCounts {
            attempted: count(row, "attempted")?,
            succeeded: count(row, "succeeded")?,
            failed: count(row, "failed")?,
            skipped: count(row, "skipped")?,
            history_written: count(row, "history_written")?,
        },
        detail: row.try_get("detail")?,
    })
}
