//! Shared fixtures: a scripted extractor and ledgers with injected faults.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trackvault::extractor::{Extractor, FetchOptions, FetchedMedia, Item, ItemStream, Source, TagSet};
use trackvault::ledger::{JournalLedger, Ledger, LedgerEntry};
use trackvault::monitor::{RateLimiter, RetryPolicy, SourceMonitor};
use trackvault::utils::{ArchiveError, ArchiveResult, OrganizationSettings, OutputOrganizer};

/// Error an extractor call is scripted to return
#[derive(Debug, Clone)]
pub enum Scripted {
    Fatal(&'static str),
    Transient(&'static str),
}

impl Scripted {
    fn to_error(&self) -> ArchiveError {
        match self {
            Scripted::Fatal(msg) => ArchiveError::FatalConfig(msg.to_string()),
            Scripted::Transient(msg) => ArchiveError::TransientFetch(msg.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchCall {
    pub source: String,
    pub item_id: String,
    pub at: Instant,
}

/// Extractor whose listings and failures are set up by the test
#[derive(Default)]
pub struct FakeExtractor {
    listings: Mutex<HashMap<String, Vec<Item>>>,
    enumerate_always: Mutex<HashMap<String, Scripted>>,
    enumerate_once: Mutex<HashMap<String, VecDeque<Scripted>>>,
    /// Error yielded mid-stream after the listed number of items
    stream_errors: Mutex<HashMap<String, (usize, Scripted)>>,
    fetch_errors: Mutex<HashMap<String, VecDeque<Scripted>>>,
    fetch_calls: Mutex<Vec<FetchCall>>,
    enumerate_calls: AtomicUsize,
    panic_on_enumerate: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_items(&self, source: &Source, items: Vec<Item>) {
        self.listings
            .lock()
            .unwrap()
            .insert(source.url().to_string(), items);
    }

    pub fn fail_enumerate_always(&self, source: &Source, error: Scripted) {
        self.enumerate_always
            .lock()
            .unwrap()
            .insert(source.url().to_string(), error);
    }

    pub fn fail_enumerate_next(&self, source: &Source, errors: Vec<Scripted>) {
        self.enumerate_once
            .lock()
            .unwrap()
            .insert(source.url().to_string(), errors.into());
    }

    /// Make every enumeration of `source` panic.
    pub fn panic_on_enumerate(&self, source: &Source) {
        self.panic_on_enumerate
            .lock()
            .unwrap()
            .insert(source.url().to_string());
    }

    /// Break the next enumeration of `source` after `after` items.
    pub fn fail_stream_after(&self, source: &Source, after: usize, error: Scripted) {
        self.stream_errors
            .lock()
            .unwrap()
            .insert(source.url().to_string(), (after, error));
    }

    /// Queue errors for the next fetches of `item_id`.
    pub fn fail_fetch(&self, item_id: &str, errors: Vec<Scripted>) {
        self.fetch_errors
            .lock()
            .unwrap()
            .insert(item_id.to_string(), errors.into());
    }

    /// Cancel `token` once `count` fetches have completed.
    pub fn cancel_after_fetches(&self, count: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((count, token));
    }

    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, item_id: &str) -> usize {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.item_id == item_id)
            .count()
    }

    pub fn fetch_times(&self, source: &Source) -> Vec<Instant> {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.source == source.url())
            .map(|c| c.at)
            .collect()
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn enumerate(&self, source: &Source) -> ArchiveResult<ItemStream> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);

        if self.panic_on_enumerate.lock().unwrap().contains(source.url()) {
            panic!("scripted extractor panic for {}", source);
        }

        if let Some(error) = self.enumerate_always.lock().unwrap().get(source.url()) {
            return Err(error.to_error());
        }
        if let Some(queue) = self.enumerate_once.lock().unwrap().get_mut(source.url()) {
            if let Some(error) = queue.pop_front() {
                return Err(error.to_error());
            }
        }

        let items = self
            .listings
            .lock()
            .unwrap()
            .get(source.url())
            .cloned()
            .unwrap_or_default();
        let mut results: Vec<ArchiveResult<Item>> = items.into_iter().map(Ok).collect();

        if let Some((after, error)) = self.stream_errors.lock().unwrap().remove(source.url()) {
            results.truncate(after);
            results.push(Err(error.to_error()));
        }

        Ok(stream::iter(results).boxed())
    }

    async fn fetch_and_convert(
        &self,
        source: &Source,
        item: &Item,
        options: &FetchOptions,
    ) -> ArchiveResult<FetchedMedia> {
        let completed = {
            let mut calls = self.fetch_calls.lock().unwrap();
            calls.push(FetchCall {
                source: source.url().to_string(),
                item_id: item.id.clone(),
                at: Instant::now(),
            });
            calls.len()
        };

        let scripted = self
            .fetch_errors
            .lock()
            .unwrap()
            .get_mut(&item.id)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error.to_error());
        }

        let path = options.staging_dir.join(format!("{}.mp3", item.id));
        tokio::fs::write(&path, format!("audio:{}", item.id)).await?;

        if let Some((count, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if completed >= *count {
                token.cancel();
            }
        }

        Ok(FetchedMedia {
            path,
            tags: TagSet::default(),
        })
    }
}

/// Ledger whose writes always fail
pub struct FailingLedger;

#[async_trait]
impl Ledger for FailingLedger {
    async fn load(&self, _source: &Source) -> HashSet<String> {
        HashSet::new()
    }

    async fn contains(&self, _source: &Source, _item_id: &str) -> bool {
        false
    }

    async fn record(&self, source: &Source, _item_id: &str) -> ArchiveResult<()> {
        Err(ArchiveError::ledger(source.url(), "disk full"))
    }

    async fn entries(&self, _source: &Source) -> ArchiveResult<Vec<LedgerEntry>> {
        Ok(Vec::new())
    }
}

pub fn source(url: &str) -> Source {
    Source::parse(url).unwrap()
}

pub fn track(id: &str, title: &str, uploader: &str, playlist: &str) -> Item {
    Item {
        id: id.to_string(),
        title: title.to_string(),
        uploader: Some(uploader.to_string()),
        playlist: Some(playlist.to_string()),
        webpage_url: Some(format!("https://soundcloud.com/{}/{}", uploader, id)),
        ..Default::default()
    }
}

/// Short fixed backoff so retry tests do not sleep for seconds
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
    )
    .without_jitter()
}

pub fn organizer(dir: &Path) -> Arc<OutputOrganizer> {
    Arc::new(OutputOrganizer::new(
        dir,
        OrganizationSettings {
            embed_metadata: false,
            ..Default::default()
        },
    ))
}

/// Archive root, fake extractor and journal ledger wired to one monitor
pub struct Harness {
    pub dir: TempDir,
    pub extractor: Arc<FakeExtractor>,
    pub ledger: Arc<dyn Ledger>,
    pub organizer: Arc<OutputOrganizer>,
    pub monitor: Arc<SourceMonitor>,
}

impl Harness {
    pub fn new(rate_limit: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let extractor = FakeExtractor::new();
        let organizer = organizer(dir.path());
        let ledger: Arc<dyn Ledger> = Arc::new(JournalLedger::new(organizer.ledger_dir()));
        Self::assemble(dir, extractor, ledger, organizer, rate_limit)
    }

    /// Same archive root and extractor, fresh process state.
    pub fn restart(self) -> Self {
        let organizer = organizer(self.dir.path());
        let ledger: Arc<dyn Ledger> = Arc::new(JournalLedger::new(organizer.ledger_dir()));
        Self::assemble(self.dir, self.extractor, ledger, organizer, Duration::ZERO)
    }

    pub fn with_ledger(self, ledger: Arc<dyn Ledger>) -> Self {
        let organizer = organizer(self.dir.path());
        Self::assemble(self.dir, self.extractor, ledger, organizer, Duration::ZERO)
    }

    fn assemble(
        dir: TempDir,
        extractor: Arc<FakeExtractor>,
        ledger: Arc<dyn Ledger>,
        organizer: Arc<OutputOrganizer>,
        rate_limit: Duration,
    ) -> Self {
        let monitor = Arc::new(SourceMonitor::new(
            extractor.clone(),
            ledger.clone(),
            organizer.clone(),
            Arc::new(RateLimiter::new(rate_limit)),
            fast_retry(3),
        ));
        Self {
            dir,
            extractor,
            ledger,
            organizer,
            monitor,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
