//! Per-source polling: rate limiting, retries and the item loop

pub mod cycle;
pub mod rate_limiter;
pub mod retry;
pub mod source_monitor;

pub use cycle::{CycleResult, FailureKind, ItemFailure, SourceAbort};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use source_monitor::SourceMonitor;
