//! Track Vault - continuous audio archive engine
//!
//! Polls a list of source URLs on a schedule and archives every new track
//! through yt-dlp into a stable folder layout.

use anyhow::{Context, Result};
use clap::Parser;
use path_absolutize::Absolutize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use trackvault::ledger::{open_ledger, LedgerBackend};
use trackvault::monitor::{RateLimiter, RetryPolicy, SourceMonitor};
use trackvault::scheduler::{Scheduler, SchedulerConfig};
use trackvault::utils::config::{default_output_dir, parse_flag, split_url_list};
use trackvault::utils::{OrganizationSettings, OutputOrganizer, Settings};
use trackvault::YtDlpExtractor;

#[derive(Parser, Debug)]
#[command(name = "trackvault", version, about = "Continuously archive audio sources")]
struct Args {
    /// Source URLs, comma separated
    #[arg(long = "url", env = "URL_LIST")]
    url_list: Vec<String>,

    /// File with one source per line (`[URL LIST]` header optional)
    #[arg(long, env = "URL_FILE")]
    url_file: Option<PathBuf>,

    /// Archive root
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Hours between cycles; 0 runs once and exits
    #[arg(long, env = "ARCHIVE_FREQUENCY_HOURS", default_value_t = 0.0)]
    archive_frequency_hours: f64,

    #[arg(long, env = "EMBED_METADATA", default_value = "true", action = clap::ArgAction::Set, value_parser = parse_flag)]
    embed_metadata: bool,

    /// Minimum seconds between downloads from one source
    #[arg(long, env = "RATE_LIMIT_SEC", default_value_t = 0.0)]
    rate_limit_sec: f64,

    #[arg(long, env = "HIGH_QUALITY_ENABLE", default_value = "false", action = clap::ArgAction::Set, value_parser = parse_flag)]
    high_quality_enable: bool,

    #[arg(long, env = "SOUNDCLOUD_OAUTH", hide_env_values = true)]
    soundcloud_oauth: Option<String>,

    /// Log available formats for each source
    #[arg(long, env = "LIST_FORMATS", default_value = "false", action = clap::ArgAction::Set, value_parser = parse_flag)]
    list_formats: bool,

    #[arg(long, env = "ALBUM_ARTIST_OVERRIDE")]
    album_artist_override: Option<String>,

    #[arg(long, env = "MAX_CONCURRENT_SOURCES", default_value_t = 4)]
    max_concurrent_sources: usize,

    /// Attempts per item for transient failures
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// `journal` or `sqlite`
    #[arg(long, env = "LEDGER_BACKEND", default_value = "journal")]
    ledger_backend: LedgerBackend,

    #[arg(long, env = "SKIP_INTRO", default_value = "false", action = clap::ArgAction::Set, value_parser = parse_flag)]
    skip_intro: bool,
}

impl Args {
    fn into_settings(self) -> Result<Settings> {
        let output_dir = self.output_dir.unwrap_or_else(default_output_dir);
        let output_dir = output_dir
            .absolutize()
            .with_context(|| format!("Invalid output directory {}", output_dir.display()))?
            .to_path_buf();

        Ok(Settings {
            url_list: self
                .url_list
                .iter()
                .flat_map(|raw| split_url_list(raw))
                .collect(),
            url_file: self.url_file,
            output_dir,
            archive_frequency_hours: self.archive_frequency_hours,
            embed_metadata: self.embed_metadata,
            rate_limit_sec: self.rate_limit_sec,
            high_quality_enable: self.high_quality_enable,
            soundcloud_oauth: self.soundcloud_oauth.filter(|t| !t.trim().is_empty()),
            list_formats: self.list_formats,
            album_artist_override: self.album_artist_override.filter(|a| !a.trim().is_empty()),
            max_concurrent_sources: self.max_concurrent_sources,
            retry_attempts: self.retry_attempts,
            ledger_backend: self.ledger_backend,
            skip_intro: self.skip_intro,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = args.into_settings()?;
    settings.validate()?;

    if !settings.skip_intro {
        print_banner(&settings);
    }

    let organizer = Arc::new(OutputOrganizer::new(
        &settings.output_dir,
        OrganizationSettings {
            embed_metadata: settings.embed_metadata,
            album_artist_override: settings.album_artist_override.clone(),
            ..Default::default()
        },
    ));
    organizer
        .create_directory_structure()
        .await
        .context("Failed to prepare output directory")?;

    let cookies = organizer.cookies_file();
    if let Some(path) = &cookies {
        info!("Using cookies from {}", path.display());
    }
    let sources = settings.sources(cookies.as_deref())?;

    let extractor = YtDlpExtractor::new()?.with_list_formats(settings.list_formats);
    let ledger = open_ledger(settings.ledger_backend, &organizer.ledger_dir())
        .await
        .context("Failed to open ledger")?;

    let monitor = Arc::new(SourceMonitor::new(
        Arc::new(extractor),
        ledger,
        organizer,
        Arc::new(RateLimiter::new(settings.rate_limit())),
        RetryPolicy::with_max_attempts(settings.retry_attempts()),
    ));

    let scheduler = Scheduler::new(SchedulerConfig::from_settings(&settings), sources, monitor);
    spawn_signal_handler(scheduler.cancellation_token());

    let summary = scheduler.run().await;
    if summary.failed > 0 {
        warn!("{} items could not be archived", summary.failed);
    }
    Ok(())
}

fn print_banner(settings: &Settings) {
    println!("==============================");
    println!("  Track Vault archive engine");
    println!("==============================");
    println!("Output directory: {}", settings.output_dir.display());
    match settings.archive_interval() {
        Some(interval) => println!("Checking every {:.2} hours", interval.as_secs_f64() / 3600.0),
        None => println!("Running a single cycle"),
    }
    println!("Monitoring:");
    for url in &settings.url_list {
        println!("  {}", url);
    }
    if let Some(file) = &settings.url_file {
        println!("  (plus entries from {})", file.display());
    }
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown requested, finishing current items");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
