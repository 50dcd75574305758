use super::cycle::{CycleResult, ItemFailure};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy};
use crate::extractor::{Extractor, FetchOptions, Item, ItemStream, Source};
use crate::ledger::Ledger;
use crate::utils::error::{ArchiveError, ArchiveResult};
use crate::utils::organizer::OutputOrganizer;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Consecutive organizer failures, with nothing else attempted, that end a
/// source's cycle early.
const ORGANIZER_ABORT_THRESHOLD: usize = 3;

/// Drives one poll of one source: enumerate, skip what the ledger knows,
/// then fetch, place and record each new item in order.
pub struct SourceMonitor {
    extractor: Arc<dyn Extractor>,
    ledger: Arc<dyn Ledger>,
    organizer: Arc<OutputOrganizer>,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

/// How an enumeration pass ended
enum PassEnd {
    Completed,
    Cancelled,
    /// Enumeration itself failed; may be retried
    EnumerateFailed(ArchiveError),
    /// Source-level failure; no more items this cycle
    Aborted(ArchiveError),
}

/// Bookkeeping that survives enumeration re-passes within one cycle
struct CycleState {
    known: HashSet<String>,
    handled: HashSet<String>,
    attempted: usize,
    organizer_failures: usize,
    fetch_options: FetchOptions,
    result: CycleResult,
}

impl SourceMonitor {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        ledger: Arc<dyn Ledger>,
        organizer: Arc<OutputOrganizer>,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            extractor,
            ledger,
            organizer,
            rate_limiter,
            retry_policy,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Run one cycle for `source`. Never fails: every error ends up in the
    /// returned result.
    #[instrument(skip_all, fields(source = %source, extractor = self.extractor.id()))]
    pub async fn run_cycle(&self, source: &Source, cancel: &CancellationToken) -> CycleResult {
        let mut result = CycleResult::new(source.clone());

        let staging_dir = match self.organizer.prepare_staging(source).await {
            Ok(dir) => dir,
            Err(e) => {
                result.abort(&e);
                result.log_summary();
                return result;
            }
        };

        let known = self.ledger.load(source).await;
        debug!("{} items already archived", known.len());

        let mut state = CycleState {
            known,
            handled: HashSet::new(),
            attempted: 0,
            organizer_failures: 0,
            fetch_options: FetchOptions {
                staging_dir,
                embed_metadata: self.organizer.settings.embed_metadata,
            },
            result,
        };

        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                state.result.cancelled = true;
                break;
            }

            let end = match self.extractor.enumerate(source).await {
                Ok(stream) => self.process_pass(source, stream, &mut state, cancel).await,
                Err(e) => PassEnd::EnumerateFailed(e),
            };

            match end {
                PassEnd::Completed => break,
                PassEnd::Cancelled => {
                    state.result.cancelled = true;
                    break;
                }
                PassEnd::Aborted(e) => {
                    state.result.abort(&e);
                    break;
                }
                PassEnd::EnumerateFailed(e) => match self.retry_policy.should_retry(&e, attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        warn!(
                            "Enumeration failed (attempt {}), retrying in {:?}: {}",
                            attempt, delay, e
                        );
                        if sleep_or_cancel(delay, cancel).await {
                            state.result.cancelled = true;
                            break;
                        }
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!("Not retrying enumeration: {}", reason);
                        state.result.abort(&e);
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.organizer.clear_staging(source).await {
            warn!("Could not clear staging directory: {}", e);
        }

        let result = state.result;
        result.log_summary();
        result
    }

    /// Consume one enumeration pass. Cancellation is observed while waiting
    /// for the next item and before each download, never mid-item.
    async fn process_pass(
        &self,
        source: &Source,
        mut stream: ItemStream,
        state: &mut CycleState,
        cancel: &CancellationToken,
    ) -> PassEnd {
        let mut pass_seen = HashSet::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PassEnd::Cancelled,
                next = stream.next() => next,
            };

            let item = match next {
                None => return PassEnd::Completed,
                Some(Ok(item)) => item,
                Some(Err(e)) => return PassEnd::EnumerateFailed(e),
            };

            if !pass_seen.insert(item.id.clone()) {
                debug!("Skipping duplicate item {} in enumeration", item.id);
                state.result.duplicates += 1;
                continue;
            }
            if !state.handled.insert(item.id.clone()) {
                // Already dealt with in an earlier pass of this cycle
                continue;
            }
            state.result.discovered += 1;

            if state.known.contains(&item.id) {
                state.result.already_archived += 1;
                continue;
            }

            if cancel.is_cancelled() {
                return PassEnd::Cancelled;
            }

            state.attempted += 1;
            match self.archive_item(source, &item, &state.fetch_options, cancel).await {
                Ok(path) => {
                    state.known.insert(item.id.clone());
                    state.result.downloaded.push(path);
                }
                Err(ArchiveError::Cancelled) => {
                    state.attempted -= 1;
                    return PassEnd::Cancelled;
                }
                Err(e) => {
                    state
                        .result
                        .failures
                        .push(ItemFailure::new(&item.id, &item.title, &e));

                    match e {
                        ArchiveError::LedgerPersistence { .. } => return PassEnd::Aborted(e),
                        ArchiveError::OrganizerIo { .. } => {
                            state.organizer_failures += 1;
                            if state.organizer_failures == state.attempted
                                && state.organizer_failures >= ORGANIZER_ABORT_THRESHOLD
                            {
                                return PassEnd::Aborted(e);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Fetch with retries, place, then record. The ledger entry is written
    /// only after the file is at its final path.
    ///
    /// Returns `ArchiveError::Cancelled` when the token fires before the
    /// first fetch starts, including during the rate limiter wait.
    async fn archive_item(
        &self,
        source: &Source,
        item: &Item,
        options: &FetchOptions,
        cancel: &CancellationToken,
    ) -> ArchiveResult<PathBuf> {
        let mut attempt = 1;
        let mut last_error = None;
        let media = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(last_error.unwrap_or(ArchiveError::Cancelled)),
                _ = self.rate_limiter.wait(source) => {}
            }
            debug!(item = %item.id, attempt, "Fetching '{}'", item.title);

            match self.extractor.fetch_and_convert(source, item, options).await {
                Ok(media) => break media,
                Err(e) => match self.retry_policy.should_retry(&e, attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        warn!(
                            item = %item.id,
                            "Fetch failed (attempt {}), retrying in {:?}: {}",
                            attempt, delay, e
                        );
                        if sleep_or_cancel(delay, cancel).await {
                            return Err(e);
                        }
                        last_error = Some(e);
                        attempt = next;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(item = %item.id, "Giving up: {}", reason);
                        return Err(e);
                    }
                },
            }
        };

        let path = self.organizer.place(source, item, &media).await?;
        self.ledger.record(source, &item.id).await?;
        info!(item = %item.id, "Archived '{}'", item.title);
        Ok(path)
    }
}

/// Returns true when cancelled before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
