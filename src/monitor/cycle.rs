//! Per-source outcome of one poll

use crate::extractor::Source;
use crate::utils::error::ArchiveError;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Classification of an item or source failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    FatalConfig,
    Transient,
    LedgerPersistence,
    OrganizerIo,
    Other,
}

impl From<&ArchiveError> for FailureKind {
    fn from(error: &ArchiveError) -> Self {
        match error {
            ArchiveError::FatalConfig(_) | ArchiveError::YtDlpNotFound => FailureKind::FatalConfig,
            ArchiveError::TransientFetch(_) => FailureKind::Transient,
            ArchiveError::LedgerPersistence { .. } | ArchiveError::Database(_) => {
                FailureKind::LedgerPersistence
            }
            ArchiveError::OrganizerIo { .. } => FailureKind::OrganizerIo,
            ArchiveError::Io(_) | ArchiveError::Serialization(_) | ArchiveError::Cancelled => {
                FailureKind::Other
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::FatalConfig => "fatal-config",
            FailureKind::Transient => "transient",
            FailureKind::LedgerPersistence => "ledger",
            FailureKind::OrganizerIo => "organizer-io",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// One item that could not be archived this cycle
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub item_id: String,
    pub title: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(item_id: &str, title: &str, error: &ArchiveError) -> Self {
        Self {
            item_id: item_id.to_string(),
            title: title.to_string(),
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }
}

/// Source-level error that ended the cycle early
#[derive(Debug, Clone)]
pub struct SourceAbort {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&ArchiveError> for SourceAbort {
    fn from(error: &ArchiveError) -> Self {
        Self {
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleResult {
    pub source: Source,
    /// Distinct item ids seen during enumeration
    pub discovered: usize,
    pub already_archived: usize,
    /// Repeated ids within one enumeration pass
    pub duplicates: usize,
    pub downloaded: Vec<PathBuf>,
    pub failures: Vec<ItemFailure>,
    pub aborted: Option<SourceAbort>,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl CycleResult {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            discovered: 0,
            already_archived: 0,
            duplicates: 0,
            downloaded: Vec::new(),
            failures: Vec::new(),
            aborted: None,
            cancelled: false,
        }
    }

    pub fn newly_downloaded(&self) -> usize {
        self.downloaded.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failures.is_empty()
    }

    pub(crate) fn abort(&mut self, error: &ArchiveError) {
        self.aborted = Some(SourceAbort::from(error));
    }

    /// One summary line, plus a warning per failure
    pub fn log_summary(&self) {
        info!(
            source = %self.source,
            discovered = self.discovered,
            already_archived = self.already_archived,
            downloaded = self.newly_downloaded(),
            failed = self.failed(),
            cancelled = self.cancelled,
            "Source cycle finished"
        );

        for failure in &self.failures {
            warn!(
                source = %self.source,
                item = %failure.item_id,
                kind = %failure.kind,
                "Failed to archive '{}': {}",
                failure.title,
                failure.message
            );
        }

        if let Some(abort) = &self.aborted {
            warn!(
                source = %self.source,
                kind = %abort.kind,
                "Source cycle aborted: {}",
                abort.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            FailureKind::from(&ArchiveError::FatalConfig("x".into())),
            FailureKind::FatalConfig
        );
        assert_eq!(
            FailureKind::from(&ArchiveError::TransientFetch("x".into())),
            FailureKind::Transient
        );
        assert_eq!(
            FailureKind::from(&ArchiveError::ledger("u", "x")),
            FailureKind::LedgerPersistence
        );
        assert_eq!(
            FailureKind::from(&ArchiveError::organizer_io("/a", io::Error::other("x"))),
            FailureKind::OrganizerIo
        );
    }

    #[test]
    fn test_cycle_result_counts() {
        let source = Source::parse("https://soundcloud.com/a").unwrap();
        let mut result = CycleResult::new(source);
        assert!(result.is_success());

        result.downloaded.push(PathBuf::from("/archive/Mix/Song-Artist.mp3"));
        result.failures.push(ItemFailure::new(
            "2",
            "Other",
            &ArchiveError::TransientFetch("timeout".into()),
        ));
        assert_eq!(result.newly_downloaded(), 1);
        assert_eq!(result.failed(), 1);
        assert!(!result.is_success());

        result.abort(&ArchiveError::FatalConfig("private".into()));
        assert_eq!(result.aborted.as_ref().map(|a| a.kind), Some(FailureKind::FatalConfig));
    }
}
