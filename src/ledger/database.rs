//! SQLite ledger backend

use super::{Ledger, LedgerEntry};
use crate::extractor::Source;
use crate::utils::error::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Database file name inside the ledger directory
pub const LEDGER_DB: &str = "ledger.db";

/// Ledger stored in `ledger.db`, one row per archived item
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: Pool<Sqlite>,
}

impl SqliteLedger {
    /// Open (creating if needed) the database under `ledger_dir`
    pub async fn open(ledger_dir: &Path) -> ArchiveResult<Self> {
        let db_path = ledger_dir.join(LEDGER_DB);
        debug!("Opening ledger database at {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        create_tables(&pool).await?;
        info!("Ledger database ready: {}", db_path.display());
        Ok(Self { pool })
    }
}

async fn create_tables(pool: &Pool<Sqlite>) -> ArchiveResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            source TEXT NOT NULL,
            item_id TEXT NOT NULL,
            downloaded_at DATETIME NOT NULL,
            PRIMARY KEY (source, item_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn load(&self, source: &Source) -> HashSet<String> {
        let rows = sqlx::query("SELECT item_id FROM ledger_entries WHERE source = ?")
            .bind(source.url())
            .fetch_all(&self.pool)
            .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.try_get::<String, _>("item_id").ok())
                .collect(),
            Err(e) => {
                warn!("Ledger for {} unreadable, treating as empty: {}", source, e);
                HashSet::new()
            }
        }
    }

    async fn contains(&self, source: &Source, item_id: &str) -> bool {
        let row = sqlx::query("SELECT 1 FROM ledger_entries WHERE source = ? AND item_id = ?")
            .bind(source.url())
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row.is_some(),
            Err(e) => {
                warn!("Ledger lookup failed for {}: {}", source, e);
                false
            }
        }
    }

    async fn record(&self, source: &Source, item_id: &str) -> ArchiveResult<()> {
        let entry = LedgerEntry::new(source, item_id);
        sqlx::query(
            "INSERT OR IGNORE INTO ledger_entries (source, item_id, downloaded_at) VALUES (?, ?, ?)",
        )
        .bind(&entry.source)
        .bind(&entry.item_id)
        .bind(entry.downloaded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ArchiveError::ledger(source.url(), e))?;

        debug!("Recorded {} for {}", item_id, source);
        Ok(())
    }

    async fn entries(&self, source: &Source) -> ArchiveResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT source, item_id, downloaded_at FROM ledger_entries WHERE source = ? ORDER BY downloaded_at, rowid",
        )
        .bind(source.url())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ArchiveError::ledger(source.url(), e))?;

        rows.into_iter()
            .map(|row| {
                Ok(LedgerEntry {
                    source: row.try_get("source")?,
                    item_id: row.try_get("item_id")?,
                    downloaded_at: row.try_get::<DateTime<Utc>, _>("downloaded_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| ArchiveError::ledger(source.url(), e))
    }
}
