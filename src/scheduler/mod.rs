pub mod manager;
pub mod report;

pub use manager::{Scheduler, SchedulerConfig, SchedulerState, SourceStatus};
pub use report::{CycleReport, RunSummary};
