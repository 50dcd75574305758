use crate::monitor::CycleResult;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// All source results of one scheduler cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In configured source order
    pub results: Vec<CycleResult>,
}

impl CycleReport {
    pub fn discovered(&self) -> usize {
        self.results.iter().map(|r| r.discovered).sum()
    }

    pub fn already_archived(&self) -> usize {
        self.results.iter().map(|r| r.already_archived).sum()
    }

    pub fn downloaded(&self) -> usize {
        self.results.iter().map(CycleResult::newly_downloaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().map(CycleResult::failed).sum()
    }

    pub fn aborted_sources(&self) -> usize {
        self.results.iter().filter(|r| r.aborted.is_some()).count()
    }

    pub fn cancelled(&self) -> bool {
        self.results.iter().any(|r| r.cancelled)
    }

    pub fn result_for(&self, url: &str) -> Option<&CycleResult> {
        self.results.iter().find(|r| r.source.url() == url)
    }

    pub fn log_summary(&self) {
        let elapsed = self.finished_at - self.started_at;
        info!(
            cycle = self.cycle,
            cycle_id = %self.cycle_id,
            sources = self.results.len(),
            discovered = self.discovered(),
            already_archived = self.already_archived(),
            downloaded = self.downloaded(),
            failed = self.failed(),
            aborted_sources = self.aborted_sources(),
            elapsed_secs = elapsed.num_seconds(),
            "Cycle complete"
        );
    }
}

/// Totals over every cycle of a run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub downloaded: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub last_report: Option<CycleReport>,
}

impl RunSummary {
    pub(crate) fn absorb(&mut self, report: CycleReport) {
        self.cycles += 1;
        self.downloaded += report.downloaded();
        self.failed += report.failed();
        self.last_report = Some(report);
    }
}
