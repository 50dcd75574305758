//! yt-dlp wrapper for enumeration and download
//!
//! Enumeration streams `--dump-json` lines as they are produced, so a large
//! playlist is diffed against the ledger without waiting for the whole listing.
//! Downloads land in a staging directory; placement is the organizer's job.

use crate::extractor::models::{AudioQuality, FetchOptions, FetchedMedia, Item, Source, TagSet};
use crate::extractor::traits::{Extractor, ItemStream};
use crate::utils::error::{ArchiveError, ArchiveResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Best audio stream that is not opus, falling back to any best audio.
pub const AUDIO_FORMAT: &str = "ba[acodec!*=opus]/ba";

/// Upper bound for a single download + conversion.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Extractor backed by the `yt-dlp` binary
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    ytdlp_path: PathBuf,
    list_formats: bool,
    fetch_timeout: Duration,
}

impl YtDlpExtractor {
    /// Initialize extractor and verify yt-dlp availability
    pub fn new() -> ArchiveResult<Self> {
        let ytdlp_path = find_ytdlp().ok_or(ArchiveError::YtDlpNotFound)?;
        info!("Found yt-dlp at: {}", ytdlp_path.display());
        Ok(Self::with_path(ytdlp_path))
    }

    pub fn with_path(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            list_formats: false,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    /// Log the available formats of each source before enumerating it.
    pub fn with_list_formats(mut self, enabled: bool) -> Self {
        self.list_formats = enabled;
        self
    }

    /// Get the path to yt-dlp being used
    pub fn ytdlp_path(&self) -> &Path {
        &self.ytdlp_path
    }

    async fn log_formats(&self, source: &Source) {
        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.arg("--list-formats").arg("--no-warnings");
        cmd.args(auth_args(source));
        cmd.arg(source.url());

        match cmd.output().await {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    info!(source = %source, "{}", line);
                }
            }
            Err(e) => warn!(source = %source, "Failed to list formats: {}", e),
        }
    }
}

/// Arguments carrying the source's authentication context.
fn auth_args(source: &Source) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(cookies) = &source.options.cookies_file {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().into_owned());
    }
    if source.options.quality == AudioQuality::High {
        if let Some(token) = &source.options.auth_token {
            args.push("--add-header".to_string());
            args.push(format!("Authorization:{}", token));
        }
    }
    args
}

/// Arguments for listing a source without downloading.
pub fn enumerate_args(source: &Source) -> Vec<String> {
    let mut args: Vec<String> = ["--dump-json", "--skip-download", "--ignore-errors", "--no-warnings"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(auth_args(source));
    args.push(source.url().to_string());
    args
}

/// Arguments for downloading one item into the staging directory.
pub fn fetch_args(source: &Source, item: &Item, options: &FetchOptions) -> Vec<String> {
    let template = options.staging_dir.join("%(id)s.%(ext)s");
    let mut args: Vec<String> = vec![
        "-f".into(),
        AUDIO_FORMAT.into(),
        "--no-playlist".into(),
        "--no-warnings".into(),
        "--no-progress".into(),
        "--no-simulate".into(),
        "--print".into(),
        "after_move:filepath".into(),
        "-o".into(),
        template.to_string_lossy().into_owned(),
    ];

    if options.embed_metadata {
        args.extend(
            [
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "--embed-metadata",
                "--embed-thumbnail",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
    }

    args.extend(auth_args(source));
    args.push(item.download_url(source).to_string());
    args
}

/// Map yt-dlp stderr to the error taxonomy.
pub fn classify_stderr(stderr: &str) -> ArchiveError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .unwrap_or_else(|| stderr.trim())
        .trim()
        .to_string();
    let lower = message.to_lowercase();

    const FATAL: [&str; 9] = [
        "unsupported url",
        "is not a valid url",
        "http error 401",
        "http error 403",
        "http error 404",
        "sign in",
        "login required",
        "private",
        "not available",
    ];

    if FATAL.iter().any(|p| lower.contains(p)) {
        ArchiveError::FatalConfig(message)
    } else if message.is_empty() {
        ArchiveError::TransientFetch("yt-dlp exited without output".to_string())
    } else {
        // 429, 5xx, timeouts, resets and anything unrecognized
        ArchiveError::TransientFetch(message)
    }
}

fn spawn_stderr_reader(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    }))
}

struct EnumerationState {
    lines: Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    yielded: usize,
    finished: bool,
}

impl EnumerationState {
    async fn next_item(mut self) -> Option<(ArchiveResult<Item>, Self)> {
        if self.finished {
            return None;
        }

        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Item>(&line) {
                        Ok(item) => {
                            self.yielded += 1;
                            return Some((Ok(item), self));
                        }
                        Err(e) => {
                            warn!("Skipping unparseable yt-dlp entry: {}", e);
                        }
                    }
                }
                Ok(None) => {
                    self.finished = true;
                    let status = self.child.wait().await;
                    let stderr = match self.stderr.take() {
                        Some(handle) => handle.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    return match status {
                        Ok(s) if s.success() => None,
                        Ok(s) if self.yielded > 0 => {
                            // --ignore-errors: some entries were unavailable
                            warn!(
                                "yt-dlp listed {} entries but exited with {:?}: {}",
                                self.yielded,
                                s.code(),
                                stderr.trim()
                            );
                            None
                        }
                        Ok(_) => Some((Err(classify_stderr(&stderr)), self)),
                        Err(e) => Some((Err(ArchiveError::TransientFetch(e.to_string())), self)),
                    };
                }
                Err(e) => {
                    self.finished = true;
                    return Some((Err(ArchiveError::TransientFetch(e.to_string())), self));
                }
            }
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn id(&self) -> &'static str {
        "yt-dlp"
    }

    async fn enumerate(&self, source: &Source) -> ArchiveResult<ItemStream> {
        if self.list_formats {
            self.log_formats(source).await;
        }

        debug!("Enumerating {}", source);
        let mut child = Command::new(&self.ytdlp_path)
            .args(enumerate_args(source))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ArchiveError::TransientFetch("yt-dlp stdout unavailable".to_string()))?;
        let stderr = spawn_stderr_reader(&mut child);

        let state = EnumerationState {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr,
            yielded: 0,
            finished: false,
        };

        Ok(stream::unfold(state, |state| state.next_item()).boxed())
    }

    async fn fetch_and_convert(
        &self,
        source: &Source,
        item: &Item,
        options: &FetchOptions,
    ) -> ArchiveResult<FetchedMedia> {
        tokio::fs::create_dir_all(&options.staging_dir).await?;

        debug!("Fetching {} ({})", item.title, item.id);
        let child = Command::new(&self.ytdlp_path)
            .args(fetch_args(source, item, options))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.fetch_timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ArchiveError::TransientFetch(format!(
                    "yt-dlp timed out after {}s",
                    self.fetch_timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .ok_or_else(|| {
                ArchiveError::TransientFetch(format!("yt-dlp produced no file for {}", item.id))
            })?;

        Ok(FetchedMedia {
            path,
            tags: TagSet {
                embed_thumbnail: options.embed_metadata,
                ..Default::default()
            },
        })
    }
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. System PATH
/// 2. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Ok(path) = which::which("yt-dlp") {
        debug!("Using system yt-dlp: {:?}", path);
        return Some(path);
    }

    let common_paths = [
        "/usr/local/bin/yt-dlp",
        "/usr/bin/yt-dlp",
        "/opt/homebrew/bin/yt-dlp",
        "~/.local/bin/yt-dlp",
    ];

    for path_str in common_paths {
        let expanded = match path_str.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            },
            None => PathBuf::from(path_str),
        };

        if is_executable(&expanded) {
            debug!("Using yt-dlp from common path: {:?}", expanded);
            return Some(expanded);
        }
    }

    warn!("yt-dlp not found anywhere!");
    None
}

/// Check if a file is executable
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        return std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::models::SourceOptions;

    fn item() -> Item {
        Item {
            id: "12345".into(),
            title: "Song".into(),
            webpage_url: Some("https://soundcloud.com/artist/song".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_rate_limit_is_transient() {
        let err = classify_stderr("ERROR: [soundcloud] 12345: HTTP Error 429: Too Many Requests");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_unsupported_url_is_fatal() {
        let err = classify_stderr("WARNING: something\nERROR: Unsupported URL: https://example.com/x");
        assert!(matches!(err, ArchiveError::FatalConfig(ref m) if m.contains("Unsupported URL")));
    }

    #[test]
    fn test_classify_forbidden_is_fatal() {
        assert!(!classify_stderr("ERROR: HTTP Error 403: Forbidden").is_retryable());
        assert!(!classify_stderr("ERROR: This track is private").is_retryable());
    }

    #[test]
    fn test_classify_unknown_and_empty_are_transient() {
        assert!(classify_stderr("ERROR: Connection reset by peer").is_retryable());
        assert!(classify_stderr("").is_retryable());
    }

    #[test]
    fn test_fetch_args_with_metadata() {
        let source = Source::parse("https://soundcloud.com/artist").unwrap();
        let options = FetchOptions {
            staging_dir: PathBuf::from("/archive/.staging/soundcloud.com_artist"),
            embed_metadata: true,
        };
        let args = fetch_args(&source, &item(), &options);

        assert_eq!(args[0], "-f");
        assert_eq!(args[1], AUDIO_FORMAT);
        assert!(args.contains(&"--embed-thumbnail".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"/archive/.staging/soundcloud.com_artist/%(id)s.%(ext)s".to_string()));
        assert_eq!(args.last().unwrap(), "https://soundcloud.com/artist/song");
    }

    #[test]
    fn test_fetch_args_without_metadata_skip_conversion() {
        let source = Source::parse("https://soundcloud.com/artist").unwrap();
        let options = FetchOptions {
            staging_dir: PathBuf::from("/tmp/stage"),
            embed_metadata: false,
        };
        let args = fetch_args(&source, &item(), &options);
        assert!(!args.contains(&"-x".to_string()));
        assert!(!args.contains(&"--embed-thumbnail".to_string()));
    }

    #[test]
    fn test_auth_header_only_for_high_quality() {
        let mut options = SourceOptions {
            auth_token: Some("OAuth 2-abc".into()),
            cookies_file: Some(PathBuf::from("/archive/cookies.txt")),
            ..Default::default()
        };
        let standard = Source::with_options("https://soundcloud.com/artist", options.clone()).unwrap();
        let args = enumerate_args(&standard);
        assert!(args.contains(&"--cookies".to_string()));
        assert!(!args.contains(&"--add-header".to_string()));

        options.quality = AudioQuality::High;
        let high = Source::with_options("https://soundcloud.com/artist", options).unwrap();
        let args = enumerate_args(&high);
        assert!(args.contains(&"Authorization:OAuth 2-abc".to_string()));
        assert_eq!(args.last().unwrap(), "https://soundcloud.com/artist");
    }

    #[test]
    fn test_find_ytdlp() {
        let result = find_ytdlp();
        println!("yt-dlp found at: {:?}", result);
        // Don't assert - yt-dlp might not be installed in CI
    }

    #[test]
    fn test_is_executable() {
        let path = PathBuf::from("/bin/sh");
        if path.exists() {
            assert!(is_executable(&path));
        }
    }
}
