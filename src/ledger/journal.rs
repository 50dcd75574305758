use super::{Ledger, LedgerEntry};
use crate::extractor::Source;
use crate::utils::error::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Append-only JSONL ledger, one file per source.
///
/// Each recorded id is a single line, flushed and synced before `record`
/// returns. Unparseable lines (a torn final write) are skipped on load.
#[derive(Debug)]
pub struct JournalLedger {
    dir: PathBuf,
    /// Keyed by file; sources whose slugs collide share one writer
    journals: DashMap<PathBuf, Arc<SourceJournal>>,
}

#[derive(Debug)]
struct SourceJournal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

#[derive(Debug, Default)]
struct JournalState {
    /// Known item ids per source URL, present once loaded
    known: HashMap<String, HashSet<String>>,
    writer: Option<File>,
}

impl JournalLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            journals: DashMap::new(),
        }
    }

    /// Journal file used for `source`
    pub fn journal_path(&self, source: &Source) -> PathBuf {
        self.dir.join(format!("{}.jsonl", source.slug()))
    }

    fn journal(&self, source: &Source) -> Arc<SourceJournal> {
        let path = self.journal_path(source);
        self.journals
            .entry(path.clone())
            .or_insert_with(|| {
                Arc::new(SourceJournal {
                    path,
                    state: Mutex::new(JournalState::default()),
                })
            })
            .clone()
    }
}

/// Read the entries of `source_url` from a journal file. A missing file is
/// empty. Distinct URLs may share a slug, so entries are filtered by source.
/// Lines are parsed one by one so a corrupt line never hides its neighbours.
async fn read_entries(path: &Path, source_url: &str) -> std::io::Result<Vec<LedgerEntry>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut entries = Vec::new();
    for line in content.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<LedgerEntry>(line) {
            Ok(entry) if entry.source == source_url => entries.push(entry),
            Ok(_) => {}
            Err(e) => warn!(
                "Skipping unreadable ledger line in {}: {}",
                path.display(),
                e
            ),
        }
    }
    Ok(entries)
}

/// Open for append, terminating a torn final line first so the next entry
/// starts cleanly.
async fn open_writer(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let needs_newline = match tokio::fs::read(path).await {
        Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    if needs_newline {
        file.write_all(b"\n").await?;
    }
    Ok(file)
}

impl SourceJournal {
    /// Known ids for `source`, read from disk on first use. An unreadable
    /// file starts an empty set so ids recorded by this process still count.
    async fn known<'a>(
        &self,
        source: &Source,
        state: &'a mut JournalState,
    ) -> &'a mut HashSet<String> {
        if !state.known.contains_key(source.url()) {
            let ids: HashSet<String> = match read_entries(&self.path, source.url()).await {
                Ok(entries) => entries.into_iter().map(|e| e.item_id).collect(),
                Err(e) => {
                    warn!(
                        "Ledger {} unreadable, treating as empty: {}",
                        self.path.display(),
                        e
                    );
                    HashSet::new()
                }
            };
            debug!(
                "Loaded {} ledger entries from {}",
                ids.len(),
                self.path.display()
            );
            state.known.insert(source.url().to_string(), ids);
        }
        state.known.entry(source.url().to_string()).or_default()
    }
}

#[async_trait]
impl Ledger for JournalLedger {
    async fn load(&self, source: &Source) -> HashSet<String> {
        let journal = self.journal(source);
        let mut state = journal.state.lock().await;
        let ids = journal.known(source, &mut state).await.clone();
        ids
    }

    async fn contains(&self, source: &Source, item_id: &str) -> bool {
        let journal = self.journal(source);
        let mut state = journal.state.lock().await;
        let found = journal.known(source, &mut state).await.contains(item_id);
        found
    }

    async fn record(&self, source: &Source, item_id: &str) -> ArchiveResult<()> {
        let journal = self.journal(source);
        let mut state = journal.state.lock().await;
        if journal.known(source, &mut state).await.contains(item_id) {
            return Ok(());
        }

        let entry = LedgerEntry::new(source, item_id);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if state.writer.is_none() {
            let file = open_writer(&journal.path)
                .await
                .map_err(|e| ArchiveError::ledger(source.url(), e))?;
            state.writer = Some(file);
        }

        let result = match state.writer.as_mut() {
            Some(writer) => append_line(writer, &line).await,
            None => Ok(()),
        };
        if let Err(e) = result {
            // Reopen on the next attempt
            state.writer = None;
            return Err(ArchiveError::ledger(source.url(), e));
        }

        journal
            .known(source, &mut state)
            .await
            .insert(item_id.to_string());
        debug!("Recorded {} for {}", item_id, source);
        Ok(())
    }

    async fn entries(&self, source: &Source) -> ArchiveResult<Vec<LedgerEntry>> {
        let journal = self.journal(source);
        let _state = journal.state.lock().await;
        read_entries(&journal.path, source.url())
            .await
            .map_err(|e| ArchiveError::ledger(source.url(), e))
    }
}

async fn append_line(writer: &mut File, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    writer.sync_data().await
}
