//! Musinsa price crawler
//!
//! Periodically crawls product and pricing facts from the store and keeps
//! them as an append-only price history: governed fetching of listing and
//! detail pages, change-aware writes, and a job scheduler that never runs
//! the same job kind twice at once.

// Module declarations
pub mod crawling;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod scheduler;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the types most callers need
pub use crawling::{CrawlPipeline, TargetOutcome};
pub use domain::{JobKind, JobRun, JobState, JobStatus, RunCompleted, RunCounts};
pub use error::SchedulerError;
pub use scheduler::JobScheduler;
