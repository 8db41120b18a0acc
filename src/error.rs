//! Crawl error taxonomy shared by every pipeline stage.
//!
//! Per-target errors (`FetchError`, `ExtractionError`, `WriteError`) never abort
//! a job: they are folded into [`TargetFailure`] and surface only in run
//! statistics and logs. `EnumerationError` ends the enumeration of one
//! category, and the scheduler boundary only ever reports [`SchedulerError`].

use std::fmt;

use thiserror::Error;

use crate::domain::job::JobKind;

/// Kind of a page fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Navigation or readiness wait exceeded the per-target timeout.
    Timeout,
    /// Connection, DNS, TLS or an unexpected upstream status.
    Network,
    /// The site refused us (403 / 429 / bot wall).
    Blocked,
    /// The page does not exist (404 / 410).
    NotFound,
    /// The run was stopped or hit its deadline while the fetch was pending.
    Cancelled,
}

impl FetchErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Blocked => "blocked",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the governor may retry after backing off.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::Blocked)
    }

    /// Maps an HTTP status to a failure kind. `None` means the status is a success.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            404 | 410 => Some(Self::NotFound),
            401 | 403 | 429 => Some(Self::Blocked),
            _ => Some(Self::Network),
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A page could not be loaded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetch {kind} for {url}: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub detail: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            detail: detail.into(),
        }
    }

    pub fn timeout(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, url, detail)
    }

    pub fn network(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, url, detail)
    }

    pub fn blocked(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Blocked, url, detail)
    }

    pub fn not_found(url: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, url, "page does not exist")
    }

    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, url, "run stopped before the fetch completed")
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, FetchErrorKind::Cancelled)
    }
}

/// A required field was missing or malformed. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("required field '{field}' could not be extracted: {reason}")]
pub struct ExtractionError {
    pub field: String,
    pub reason: String,
}

impl ExtractionError {
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            reason: "not present in page".to_string(),
        }
    }

    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a category listing could not be enumerated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnumerationCause {
    #[error("navigation failed: {0}")]
    Navigation(FetchError),
    #[error("listing could not be parsed: {0}")]
    Parse(ExtractionError),
}

/// The first listing page of a category was unreachable or unparseable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("enumeration of category {category} failed: {cause}")]
pub struct EnumerationError {
    pub category: String,
    pub cause: EnumerationCause,
}

impl EnumerationError {
    pub fn navigation(category: &str, error: FetchError) -> Self {
        Self {
            category: category.to_string(),
            cause: EnumerationCause::Navigation(error),
        }
    }

    pub fn parse(category: &str, error: ExtractionError) -> Self {
        Self {
            category: category.to_string(),
            cause: EnumerationCause::Parse(error),
        }
    }

    /// The first page was abandoned because the run stopped, not because
    /// the listing is broken.
    pub fn is_cancelled(&self) -> bool {
        matches!(&self.cause, EnumerationCause::Navigation(e) if e.is_cancelled())
    }
}

/// Storage-level failure from the SQLite layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

impl StoreError {
    /// SQLite `BUSY` (5), `LOCKED` (6) and their extended codes mean another
    /// writer holds the lock; the caller may retry.
    pub fn is_contention(&self) -> bool {
        let Self::Database(sqlx::Error::Database(db)) = self else {
            return false;
        };
        let Some(code) = db.code() else {
            return false;
        };
        code.parse::<i32>()
            .map(|c| matches!(c & 0xff, 5 | 6))
            .unwrap_or(false)
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
    }
}

/// Change-aware write failure.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Another writer held the product row; retried once before surfacing.
    #[error("write conflict on product {product}")]
    Conflict { product: String },

    #[error("storage failure while writing {product}: {source}")]
    Storage {
        product: String,
        #[source]
        source: StoreError,
    },
}

impl WriteError {
    pub fn from_store(product: &str, source: StoreError) -> Self {
        if source.is_contention() {
            Self::Conflict {
                product: product.to_string(),
            }
        } else {
            Self::Storage {
                product: product.to_string(),
                source,
            }
        }
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Per-target failure recorded in run statistics.
#[derive(Debug, Error)]
pub enum TargetFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Write(#[from] WriteError),
}

impl TargetFailure {
    /// Stable label used in log fields and run summaries.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Fetch(e) => match e.kind {
                FetchErrorKind::Timeout => "fetch.timeout",
                FetchErrorKind::Network => "fetch.network",
                FetchErrorKind::Blocked => "fetch.blocked",
                FetchErrorKind::NotFound => "fetch.not_found",
                FetchErrorKind::Cancelled => "fetch.cancelled",
            },
            Self::Extraction(_) => "extraction",
            Self::Write(WriteError::Conflict { .. }) => "write.conflict",
            Self::Write(WriteError::Storage { .. }) => "write.storage",
        }
    }
}

/// Errors observable at the scheduler boundary.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already running")]
    AlreadyRunning(JobKind),

    #[error("job {kind} is disabled in configuration")]
    Disabled { kind: JobKind },

    #[error("invalid scheduler setup: {0}")]
    Configuration(String),

    #[error("scheduler storage failure: {0}")]
    Storage(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, None)]
    #[case(302, None)]
    #[case(404, Some(FetchErrorKind::NotFound))]
    #[case(410, Some(FetchErrorKind::NotFound))]
    #[case(403, Some(FetchErrorKind::Blocked))]
    #[case(429, Some(FetchErrorKind::Blocked))]
    #[case(500, Some(FetchErrorKind::Network))]
    #[case(503, Some(FetchErrorKind::Network))]
    fn status_classification(#[case] status: u16, #[case] expected: Option<FetchErrorKind>) {
        assert_eq!(FetchErrorKind::from_status(status), expected);
    }

    #[test]
    fn not_found_and_cancelled_are_not_retryable() {
        assert!(!FetchErrorKind::NotFound.is_retryable());
        assert!(!FetchErrorKind::Cancelled.is_retryable());
        assert!(FetchErrorKind::Blocked.is_retryable());
        assert!(FetchErrorKind::Timeout.is_retryable());
    }

    #[test]
    fn failure_categories_are_stable() {
        let fetch = TargetFailure::from(FetchError::blocked("https://x", "403"));
        assert_eq!(fetch.category(), "fetch.blocked");

        let extraction = TargetFailure::from(ExtractionError::missing("sale_price"));
        assert_eq!(extraction.category(), "extraction");

        let conflict = TargetFailure::from(WriteError::Conflict {
            product: "p".into(),
        });
        assert_eq!(conflict.category(), "write.conflict");
    }

    #[test]
    fn non_database_store_errors_are_not_contention() {
        let err = StoreError::CorruptRow {
            table: "products",
            reason: "bad".into(),
        };
        assert!(!err.is_contention());
        assert!(!err.is_unique_violation());
        assert!(!WriteError::from_store("p", err).is_conflict());
    }
}
