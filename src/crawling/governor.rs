//! Rate & concurrency governor.
//!
//! Bounds simultaneous fetches with a semaphore of fetch slots, paces
//! requests per site with a keyed `governor` rate limiter and retries
//! retryable failures with exponential backoff while still holding the slot.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::infrastructure::config::CrawlerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSettings {
    pub concurrency_limit: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Minimum gap between two requests to the same site. Zero disables pacing.
    pub min_request_spacing: Duration,
}

impl From<&CrawlerConfig> for GovernorSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            max_retries: config.max_retries,
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
            min_request_spacing: config.min_request_spacing(),
        }
    }
}

/// A held fetch slot. Released on drop, whatever the exit path.
pub struct FetchSlot<'a> {
    _permit: SemaphorePermit<'a>,
    in_flight: &'a AtomicUsize,
}

impl Drop for FetchSlot<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Governor {
    settings: GovernorSettings,
    slots: Semaphore,
    site_pacing: Option<DefaultKeyedRateLimiter<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Governor {
    pub fn new(settings: GovernorSettings) -> Self {
        let site_pacing = Quota::with_period(settings.min_request_spacing).map(RateLimiter::keyed);
        Self {
            slots: Semaphore::new(settings.concurrency_limit.max(1)),
            site_pacing,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            settings,
        }
    }

    pub fn shared(settings: GovernorSettings) -> Arc<Self> {
        Arc::new(Self::new(settings))
    }

    pub const fn settings(&self) -> &GovernorSettings {
        &self.settings
    }

    /// Wait for a free slot. `None` when `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<FetchSlot<'_>> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            permit = self.slots.acquire() => permit.ok()?,
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Some(FetchSlot {
            _permit: permit,
            in_flight: &self.in_flight,
        })
    }

    /// Enforce the per-site request spacing.
    pub async fn pace(&self, site: &str) {
        if let Some(limiter) = &self.site_pacing {
            limiter.until_key_ready(&site.to_string()).await;
        }
    }

    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.settings
            .base_backoff
            .saturating_mul(factor)
            .min(self.settings.max_backoff)
    }

    /// Run `operation` inside one slot: pace, call, and on a retryable
    /// failure back off and call again, up to `max_retries` retries.
    /// Cancellation at any point, including mid-call, drops the call, frees
    /// the slot and yields [`FetchErrorKind::Cancelled`](crate::error::FetchErrorKind::Cancelled).
    pub async fn run<T, F, Fut>(
        &self,
        url: &str,
        site: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let Some(_slot) = self.acquire(cancel).await else {
            return Err(FetchError::cancelled(url));
        };

        let mut attempt = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
                () = self.pace(site) => {}
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(url, "🛑 In-flight fetch abandoned");
                    return Err(FetchError::cancelled(url));
                }
                outcome = operation() => outcome,
            };
            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.kind.is_retryable() || attempt >= self.settings.max_retries {
                if attempt > 0 {
                    warn!(url, attempts = attempt + 1, kind = %error.kind, "❌ Giving up after retries");
                }
                return Err(error);
            }

            attempt += 1;
            let backoff = self.backoff_for(attempt);
            debug!(url, attempt, backoff_ms = backoff.as_millis() as u64, kind = %error.kind, "🔄 Backing off before retry");
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::cancelled(url)),
                () = tokio::time::sleep(backoff) => {}
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots since creation or the
    /// last [`reset_peak`](Self::reset_peak).
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_peak(&self) {
        self.max_in_flight.store(self.in_flight(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchErrorKind;
    use std::sync::atomic::AtomicU32;

    fn settings(limit: usize, retries: u32) -> GovernorSettings {
        GovernorSettings {
            concurrency_limit: limit,
            max_retries: retries,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            min_request_spacing: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let governor = Governor::new(settings(1, 5));
        assert_eq!(governor.backoff_for(1), Duration::from_millis(100));
        assert_eq!(governor.backoff_for(2), Duration::from_millis(200));
        assert_eq!(governor.backoff_for(3), Duration::from_millis(350));
        assert_eq!(governor.backoff_for(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_are_retried_up_to_the_ceiling() {
        let governor = Governor::new(settings(1, 2));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), FetchError> = governor
            .run("https://x/1", "x", &cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::blocked("https://x/1", "429")) }
            })
            .await;

        assert_eq!(result.expect_err("exhausted").kind, FetchErrorKind::Blocked);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_timeout_recovers_on_retry() {
        let governor = Governor::new(settings(1, 3));
        let calls = AtomicU32::new(0);
        let result = governor
            .run("https://x/4", "x", &CancellationToken::new(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(FetchError::timeout("https://x/4", "slow"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(tokio_test::assert_ok!(result), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_call_is_abandoned_on_cancel() {
        let governor = Governor::new(settings(1, 3));
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let (result, ()) = tokio::join!(
            governor.run("https://x/5", "x", &cancel, || std::future::pending::<Result<(), FetchError>>()),
            async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                cancel.cancel();
            }
        );

        assert!(tokio_test::assert_err!(result).is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_not_retried() {
        let governor = Governor::new(settings(1, 3));
        let calls = AtomicU32::new(0);
        let result: Result<(), FetchError> = governor
            .run("https://x/2", "x", &CancellationToken::new(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::not_found("https://x/2")) }
            })
            .await;
        assert_eq!(result.expect_err("404").kind, FetchErrorKind::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slots_are_bounded_and_released() {
        let governor = Governor::new(settings(2, 0));
        let cancel = CancellationToken::new();

        let first = governor.acquire(&cancel).await.expect("slot");
        let second = governor.acquire(&cancel).await.expect("slot");
        assert_eq!(governor.in_flight(), 2);

        let third = tokio::time::timeout(Duration::from_millis(50), governor.acquire(&cancel)).await;
        assert!(third.is_err(), "third slot must wait");

        drop(first);
        drop(second);
        assert_eq!(governor.in_flight(), 0);
        assert_eq!(governor.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn cancelled_waiters_give_up() {
        let governor = Governor::new(settings(1, 0));
        let cancel = CancellationToken::new();
        let _held = governor.acquire(&cancel).await.expect("slot");

        cancel.cancel();
        assert!(governor.acquire(&cancel).await.is_none());

        let result: Result<(), FetchError> = governor
            .run("https://x/3", "x", &cancel, || async { Ok(()) })
            .await;
        assert!(tokio_test::assert_err!(result).is_cancelled());
    }
}
