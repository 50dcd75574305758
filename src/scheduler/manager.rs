//! Cycle scheduling with bounded fan-out across sources

use super::report::{CycleReport, RunSummary};
use crate::extractor::Source;
use crate::monitor::{CycleResult, FailureKind, SourceAbort, SourceMonitor};
use crate::utils::config::Settings;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between cycles; `None` runs a single cycle
    pub interval: Option<Duration>,
    /// Sources polled at once
    pub max_concurrent: usize,
}

impl SchedulerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.archive_interval(),
            max_concurrent: settings.max_concurrent_sources(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: None,
            max_concurrent: 4,
        }
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running { cycle: u64 },
    /// Waiting after `completed` cycles
    Sleeping { completed: u64 },
    Stopped,
}

/// Last known outcome for one source
#[derive(Debug, Clone, Default)]
pub struct SourceStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_downloaded: usize,
    pub total_downloaded: usize,
    /// Cycles in a row that aborted or had item failures
    pub consecutive_failed_cycles: u32,
}

/// Owns the monitored sources and drives cycles until done or cancelled
pub struct Scheduler {
    config: SchedulerConfig,
    sources: Vec<Source>,
    monitor: Arc<SourceMonitor>,
    cancel: CancellationToken,
    state_tx: watch::Sender<SchedulerState>,
    cycles: AtomicU64,
    statuses: Mutex<HashMap<String, SourceStatus>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, sources: Vec<Source>, monitor: Arc<SourceMonitor>) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            config: SchedulerConfig {
                max_concurrent: config.max_concurrent.max(1),
                ..config
            },
            sources,
            monitor,
            cancel: CancellationToken::new(),
            state_tx,
            cycles: AtomicU64::new(0),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Token that stops the scheduler. Cancelling lets in-flight items finish
    /// but starts no new items or cycles.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub async fn source_status(&self, source: &Source) -> Option<SourceStatus> {
        self.statuses.lock().await.get(source.url()).cloned()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state_tx.send_replace(state);
    }

    /// Poll every source once, at most `max_concurrent` at a time.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let cycle_id = Uuid::new_v4();
        self.set_state(SchedulerState::Running { cycle });

        let span = info_span!("cycle", cycle, cycle_id = %cycle_id);
        let started_at = Utc::now();

        let mut indexed: Vec<(usize, CycleResult)> = async {
            info!("Starting cycle over {} sources", self.sources.len());

            stream::iter(self.sources.iter().cloned().enumerate())
                .map(|(index, source)| {
                    let monitor = Arc::clone(&self.monitor);
                    let cancel = self.cancel.clone();
                    let span = tracing::Span::current();
                    async move {
                        let task_source = source.clone();
                        let handle = tokio::spawn(
                            async move { monitor.run_cycle(&task_source, &cancel).await }
                                .instrument(span),
                        );
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                error!("Monitor for {} stopped unexpectedly: {}", source, e);
                                let mut result = CycleResult::new(source);
                                result.aborted = Some(SourceAbort {
                                    kind: FailureKind::Other,
                                    message: format!("monitor task failed: {}", e),
                                });
                                result
                            }
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(self.config.max_concurrent)
                .collect::<Vec<_>>()
                .await
        }
        .instrument(span)
        .await;

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<CycleResult> = indexed.into_iter().map(|(_, r)| r).collect();
        self.update_statuses(&results).await;

        let report = CycleReport {
            cycle,
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            results,
        };
        report.log_summary();
        report
    }

    async fn update_statuses(&self, results: &[CycleResult]) {
        let mut statuses = self.statuses.lock().await;
        for result in results {
            let status = statuses.entry(result.source.url().to_string()).or_default();
            status.last_run = Some(Utc::now());
            status.last_downloaded = result.newly_downloaded();
            status.total_downloaded += result.newly_downloaded();
            if result.is_success() {
                status.consecutive_failed_cycles = 0;
            } else {
                status.consecutive_failed_cycles += 1;
            }
        }
    }

    /// Run cycles until a one-shot run completes or the token is cancelled.
    pub async fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let report = self.run_cycle().await;
            let completed = report.cycle;
            summary.absorb(report);

            let Some(interval) = self.config.interval else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(SchedulerState::Sleeping { completed });
            info!("Next cycle in {:?}", interval);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        self.set_state(SchedulerState::Stopped);
        info!(
            cycles = summary.cycles,
            downloaded = summary.downloaded,
            failed = summary.failed,
            "Scheduler stopped"
        );
        summary
    }
}
