//! Per-source spacing of downloads.
//!
//! Each source keeps the instant of its last permitted fetch; `wait` sleeps
//! until the configured spacing has elapsed since then. Sources never wait
//! on each other, and a source that has been idle longer than the spacing
//! proceeds immediately.

use crate::extractor::Source;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct RateLimiter {
    spacing: Duration,
    disabled: bool,
    /// Arc so the map shard lock is released before awaiting the mutex
    sources: DashMap<String, Arc<SourceState>>,
}

#[derive(Debug, Default)]
struct SourceState {
    /// `None` until the first fetch, which is never delayed
    last_permitted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            disabled: spacing.is_zero(),
            sources: DashMap::new(),
        }
    }

    /// Limiter that never delays (`RATE_LIMIT_SEC = 0`)
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait until `source` may start another fetch. Returns the time slept.
    pub async fn wait(&self, source: &Source) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }

        let state = self
            .sources
            .entry(source.url().to_string())
            .or_default()
            .clone();

        let mut last = state.last_permitted.lock().await;
        let now = Instant::now();
        let slept = match *last {
            Some(previous) if now < previous + self.spacing => {
                let ready_at = previous + self.spacing;
                let delay = ready_at - now;
                debug!(
                    source = %source,
                    delay_ms = delay.as_millis() as u64,
                    "rate limiting"
                );
                tokio::time::sleep_until(ready_at).await;
                delay
            }
            _ => Duration::ZERO,
        };

        *last = Some(Instant::now());
        slept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str) -> Source {
        Source::parse(&format!("https://soundcloud.com/{}", path)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_wait_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        assert_eq!(limiter.wait(&source("a")).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_waits_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let a = source("a");

        let start = Instant::now();
        limiter.wait(&a).await;
        limiter.wait(&a).await;
        limiter.wait(&a).await;
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        limiter.wait(&source("a")).await;

        let start = Instant::now();
        assert_eq!(limiter.wait(&source("b")).await, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_source_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let a = source("a");
        limiter.wait(&a).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.wait(&a).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_idle_waits_remaining_time() {
        let limiter = RateLimiter::new(Duration::from_secs(3));
        let a = source("a");
        limiter.wait(&a).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(limiter.wait(&a).await, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_disabled_limiter() {
        let limiter = RateLimiter::disabled();
        assert!(limiter.is_disabled());
        limiter.wait(&source("a")).await;
        assert_eq!(limiter.wait(&source("a")).await, Duration::ZERO);
    }
}
