//! Durable per-source record of archived items

pub mod database;
pub mod journal;

use crate::extractor::Source;
use crate::utils::error::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use database::SqliteLedger;
pub use journal::JournalLedger;

/// One archived item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub source: String,
    pub item_id: String,
    pub downloaded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(source: &Source, item_id: &str) -> Self {
        Self {
            source: source.url().to_string(),
            item_id: item_id.to_string(),
            downloaded_at: Utc::now(),
        }
    }
}

/// Storage for the set of item ids already archived per source.
///
/// `record` must be durable when it returns `Ok`, and recording an id twice
/// is a no-op.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Ids recorded for `source`. Unreadable storage yields an empty set.
    async fn load(&self, source: &Source) -> HashSet<String>;

    async fn contains(&self, source: &Source, item_id: &str) -> bool;

    async fn record(&self, source: &Source, item_id: &str) -> ArchiveResult<()>;

    /// Full entries for `source`, oldest first
    async fn entries(&self, source: &Source) -> ArchiveResult<Vec<LedgerEntry>>;
}

/// Ledger storage selected by `LEDGER_BACKEND`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// One append-only JSONL file per source
    #[default]
    Journal,
    /// Single SQLite database
    Sqlite,
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerBackend::Journal => write!(f, "journal"),
            LedgerBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "journal" | "jsonl" => Ok(LedgerBackend::Journal),
            "sqlite" | "db" => Ok(LedgerBackend::Sqlite),
            other => Err(format!(
                "unknown ledger backend '{}', expected journal or sqlite",
                other
            )),
        }
    }
}

/// Open the configured ledger under `ledger_dir`
pub async fn open_ledger(
    backend: LedgerBackend,
    ledger_dir: &Path,
) -> ArchiveResult<Arc<dyn Ledger>> {
    tokio::fs::create_dir_all(ledger_dir)
        .await
        .map_err(|e| ArchiveError::organizer_io(ledger_dir, e))?;

    let ledger: Arc<dyn Ledger> = match backend {
        LedgerBackend::Journal => Arc::new(JournalLedger::new(ledger_dir)),
        LedgerBackend::Sqlite => Arc::new(SqliteLedger::open(ledger_dir).await?),
    };
    Ok(ledger)
}
