//! Track Vault library
//!
//! Continuous archival of media sources: each cycle enumerates every
//! configured source, skips items the ledger already knows, and downloads,
//! tags and files the rest under a deterministic path.

pub mod extractor;
pub mod ledger;
pub mod monitor;
pub mod scheduler;
pub mod utils;

// Re-export main types for easier use
pub use extractor::{Extractor, Item, Source, YtDlpExtractor};
pub use ledger::{open_ledger, JournalLedger, Ledger, LedgerBackend, SqliteLedger};
pub use monitor::{CycleResult, RateLimiter, RetryPolicy, SourceMonitor};
pub use scheduler::{CycleReport, RunSummary, Scheduler, SchedulerConfig, SchedulerState};
pub use utils::{ArchiveError, ArchiveResult, OrganizationSettings, OutputOrganizer, Settings};
