//! Error handling for Track Vault

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the archive engine
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Bad URL, bad credentials or unsupported source. Never retried.
    #[error("Configuration error: {0}")]
    FatalConfig(String),

    /// Network hiccup or upstream rate limiting. Retried with backoff.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Failed to persist ledger entry for {source_url}: {reason}")]
    LedgerPersistence { source_url: String, reason: String },

    #[error("Failed to place file at {}: {source}", path.display())]
    OrganizerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shutdown requested before the item's first fetch started.
    #[error("Cancelled before the download started")]
    Cancelled,

    #[error("yt-dlp not found. Please install yt-dlp")]
    YtDlpNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ArchiveError {
    /// Only transient fetch failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArchiveError::TransientFetch(_))
    }

    pub fn organizer_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::OrganizerIo {
            path: path.into(),
            source,
        }
    }

    pub fn ledger(source_url: &str, reason: impl ToString) -> Self {
        ArchiveError::LedgerPersistence {
            source_url: source_url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ArchiveError::TransientFetch("429".into()).is_retryable());
        assert!(!ArchiveError::FatalConfig("bad url".into()).is_retryable());
        assert!(!ArchiveError::ledger("https://a", "disk full").is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!ArchiveError::organizer_io("/x", io).is_retryable());
    }

    #[test]
    fn test_organizer_error_names_path() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = ArchiveError::organizer_io("/archive/Mix/Song-Artist.mp3", io);
        assert!(err.to_string().contains("/archive/Mix/Song-Artist.mp3"));
    }
}
