//! Run-completion events for the monitoring layer.
//!
//! The pipeline only emits counters and timers; turning them into metrics or
//! dashboards is the subscriber's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::job::{JobKind, JobRun, JobStatus, RunCounts};

/// Emitted exactly once per finalized run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCompleted {
    pub run_id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub counts: RunCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

impl RunCompleted {
    /// `None` for a run that has not been finalized.
    pub fn from_run(run: &JobRun) -> Option<Self> {
        let finished_at = run.finished_at?;
        Some(Self {
            run_id: run.id,
            kind: run.kind,
            status: run.status,
            counts: run.counts,
            started_at: run.started_at,
            finished_at,
            elapsed_ms: (finished_at - run.started_at).num_milliseconds(),
        })
    }
}

/// Broadcast bus for [`RunCompleted`] events. Lagging receivers lose the
/// oldest events.
#[derive(Debug, Clone)]
pub struct RunEventBus {
    sender: broadcast::Sender<RunCompleted>,
}

impl RunEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of receivers reached; zero when nobody listens.
    pub fn publish(&self, event: RunCompleted) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RunCompleted> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RunEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished_run() -> JobRun {
        let start = Utc::now();
        JobRun::start(JobKind::CategoryRefresh, start).finish(
            JobStatus::Succeeded,
            RunCounts {
                attempted: 2,
                succeeded: 2,
                ..RunCounts::default()
            },
            None,
            start + chrono::Duration::milliseconds(1500),
        )
    }

    #[test]
    fn running_run_has_no_event() {
        let run = JobRun::start(JobKind::ProductRefresh, Utc::now());
        assert!(RunCompleted::from_run(&run).is_none());
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = RunEventBus::default();
        let event = RunCompleted::from_run(&finished_run()).expect("finished");
        assert_eq!(bus.publish(event), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_counts_and_elapsed_time() {
        let bus = RunEventBus::new(8);
        let mut rx = bus.subscribe();
        let event = RunCompleted::from_run(&finished_run()).expect("finished");
        assert_eq!(bus.publish(event), 1);

        let received = rx.recv().await.expect("event");
        assert_eq!(received.counts.succeeded, 2);
        assert_eq!(received.elapsed_ms, 1500);
        assert_eq!(received.kind, JobKind::CategoryRefresh);
    }
}
