//! Application configuration

use crate::extractor::{AudioQuality, Source, SourceOptions};
use crate::ledger::LedgerBackend;
use crate::utils::error::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Header line of an ini-style URL list file.
const URL_LIST_HEADER: &str = "[URL LIST]";

/// Engine settings, validated once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Source URLs to monitor
    pub url_list: Vec<String>,

    /// Optional file with additional sources, one per line
    pub url_file: Option<PathBuf>,

    /// Archive root
    pub output_dir: PathBuf,

    /// Hours between cycles; 0 runs a single cycle
    pub archive_frequency_hours: f64,

    /// Convert to mp3 and write tags and artwork
    pub embed_metadata: bool,

    /// Minimum spacing between downloads from one source, in seconds
    pub rate_limit_sec: f64,

    /// Request high quality streams (needs an OAuth token)
    pub high_quality_enable: bool,

    pub soundcloud_oauth: Option<String>,

    /// Log available formats for each source (debug)
    pub list_formats: bool,

    /// Album Artist written to every file instead of the collection owner
    pub album_artist_override: Option<String>,

    /// Sources polled concurrently within one cycle
    pub max_concurrent_sources: usize,

    /// Total attempts per item for transient failures
    pub retry_attempts: u32,

    pub ledger_backend: LedgerBackend,

    /// Skip the startup banner
    pub skip_intro: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url_list: Vec::new(),
            url_file: None,
            output_dir: default_output_dir(),
            archive_frequency_hours: 0.0,
            embed_metadata: true,
            rate_limit_sec: 0.0,
            high_quality_enable: false,
            soundcloud_oauth: None,
            list_formats: false,
            album_artist_override: None,
            max_concurrent_sources: 4,
            retry_attempts: 3,
            ledger_backend: LedgerBackend::Journal,
            skip_intro: false,
        }
    }
}

/// `<audio dir>/trackvault`, falling back to `./archive`
pub fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .map(|d| d.join("trackvault"))
        .unwrap_or_else(|| PathBuf::from("./archive"))
}

/// Interpret an environment-style boolean (`true`, `1`, `yes`).
pub fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    ))
}

/// Split a comma separated URL list, dropping blanks.
pub fn split_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One entry of a URL list file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlEntry {
    pub url: String,
    /// Set by `Name = URL` lines
    pub subdirectory: Option<String>,
}

/// Parse an ini-style URL list.
///
/// The `[URL LIST]` header, blank lines and `#`/`;` comments are ignored.
/// `Name = https://...` files the source under `Name`.
pub fn parse_url_file(contents: &str) -> Vec<UrlEntry> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
        .filter(|l| !l.eq_ignore_ascii_case(URL_LIST_HEADER))
        .map(|line| match line.split_once('=') {
            Some((name, url)) if !name.contains("://") && url.trim().contains("://") => UrlEntry {
                url: url.trim().to_string(),
                subdirectory: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            },
            _ => UrlEntry {
                url: line.to_string(),
                subdirectory: None,
            },
        })
        .collect()
}

impl Settings {
    /// Fail fast on configuration the engine cannot run with
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.url_list.is_empty() && self.url_file.is_none() {
            return Err(ArchiveError::FatalConfig(
                "URL_LIST is required (comma separated source URLs)".to_string(),
            ));
        }
        if Duration::try_from_secs_f64(self.archive_frequency_hours * 3600.0).is_err() {
            return Err(ArchiveError::FatalConfig(format!(
                "ARCHIVE_FREQUENCY_HOURS must be a non-negative number of hours, got {}",
                self.archive_frequency_hours
            )));
        }
        if Duration::try_from_secs_f64(self.rate_limit_sec).is_err() {
            return Err(ArchiveError::FatalConfig(format!(
                "RATE_LIMIT_SEC must be a non-negative number of seconds, got {}",
                self.rate_limit_sec
            )));
        }
        if self.high_quality_enable
            && self
                .soundcloud_oauth
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
        {
            return Err(ArchiveError::FatalConfig(
                "HIGH_QUALITY_ENABLE requires SOUNDCLOUD_OAUTH".to_string(),
            ));
        }
        Ok(())
    }

    /// Sleep between cycles, `None` for a one-shot run
    pub fn archive_interval(&self) -> Option<Duration> {
        if self.archive_frequency_hours > 0.0 {
            Duration::try_from_secs_f64(self.archive_frequency_hours * 3600.0).ok()
        } else {
            None
        }
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.rate_limit_sec).unwrap_or(Duration::ZERO)
    }

    pub fn max_concurrent_sources(&self) -> usize {
        self.max_concurrent_sources.max(1)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.max(1)
    }

    /// Read the URL file, if configured
    pub fn read_url_file(&self) -> ArchiveResult<Vec<UrlEntry>> {
        match &self.url_file {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    ArchiveError::FatalConfig(format!(
                        "cannot read URL file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(parse_url_file(&contents))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Build the monitored sources, normalized and deduplicated
    pub fn sources(&self, cookies_file: Option<&Path>) -> ArchiveResult<Vec<Source>> {
        let mut entries: Vec<UrlEntry> = self
            .url_list
            .iter()
            .map(|url| UrlEntry {
                url: url.clone(),
                subdirectory: None,
            })
            .collect();
        entries.extend(self.read_url_file()?);

        let quality = if self.high_quality_enable {
            AudioQuality::High
        } else {
            AudioQuality::Standard
        };

        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(entries.len());
        for entry in entries {
            let options = SourceOptions {
                subdirectory: entry.subdirectory,
                auth_token: self.soundcloud_oauth.clone(),
                cookies_file: cookies_file.map(Path::to_path_buf),
                quality,
            };
            let source = Source::with_options(&entry.url, options)?;
            if seen.insert(source.url().to_string()) {
                sources.push(source);
            } else {
                warn!("Ignoring duplicate source {}", source);
            }
        }

        if sources.is_empty() {
            return Err(ArchiveError::FatalConfig(
                "no source URLs configured".to_string(),
            ));
        }
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(urls: &[&str]) -> Settings {
        Settings {
            url_list: urls.iter().map(|u| u.to_string()).collect(),
            output_dir: PathBuf::from("/archive"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = Settings::default();
        assert!(config.embed_metadata);
        assert_eq!(config.archive_interval(), None);
        assert_eq!(config.rate_limit(), Duration::ZERO);
        assert!(config.max_concurrent_sources() > 0);
        assert!(config.retry_attempts() > 0);
    }

    #[test]
    fn test_missing_url_list_is_fatal() {
        let err = Settings::default().validate().unwrap_err();
        assert!(matches!(err, ArchiveError::FatalConfig(ref m) if m.contains("URL_LIST")));
    }

    #[test]
    fn test_high_quality_requires_token() {
        let mut config = settings(&["https://soundcloud.com/a"]);
        config.high_quality_enable = true;
        assert!(config.validate().is_err());

        config.soundcloud_oauth = Some("OAuth 2-xyz".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_frequency_rejected() {
        let mut config = settings(&["https://soundcloud.com/a"]);
        config.archive_frequency_hours = -1.0;
        assert!(config.validate().is_err());
        config.archive_frequency_hours = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let mut config = settings(&["https://soundcloud.com/a"]);
        config.archive_frequency_hours = 1e300;
        assert!(matches!(config.validate(), Err(ArchiveError::FatalConfig(_))));
        assert_eq!(config.archive_interval(), None);

        config.archive_frequency_hours = 0.0;
        config.rate_limit_sec = 1e300;
        assert!(matches!(config.validate(), Err(ArchiveError::FatalConfig(_))));
        assert_eq!(config.rate_limit(), Duration::ZERO);
    }

    #[test]
    fn test_archive_interval_from_hours() {
        let mut config = settings(&["https://soundcloud.com/a"]);
        config.archive_frequency_hours = 0.5;
        assert_eq!(config.archive_interval(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_config_minimums() {
        let mut config = settings(&["https://soundcloud.com/a"]);
        config.max_concurrent_sources = 0;
        config.retry_attempts = 0;
        assert_eq!(config.max_concurrent_sources(), 1);
        assert_eq!(config.retry_attempts(), 1);
    }

    #[test]
    fn test_parse_flag_values() {
        for truthy in ["True", "true", "1", "yes", " YES "] {
            assert_eq!(parse_flag(truthy), Ok(true), "{}", truthy);
        }
        for falsy in ["False", "0", "no", ""] {
            assert_eq!(parse_flag(falsy), Ok(false), "{}", falsy);
        }
    }

    #[test]
    fn test_split_url_list() {
        assert_eq!(
            split_url_list(" https://a.com/x , ,https://b.com/y,"),
            vec!["https://a.com/x", "https://b.com/y"]
        );
    }

    #[test]
    fn test_parse_url_file() {
        let contents = "[URL LIST]\nhttps://soundcloud.com/a\n\n# comment\nFavourites = https://soundcloud.com/b/likes\nhttps://www.youtube.com/watch?v=abc\n";
        let entries = parse_url_file(contents);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].subdirectory, None);
        assert_eq!(entries[1].url, "https://soundcloud.com/b/likes");
        assert_eq!(entries[1].subdirectory.as_deref(), Some("Favourites"));
        // '=' inside a query string is not a name separator
        assert_eq!(entries[2].url, "https://www.youtube.com/watch?v=abc");
        assert_eq!(entries[2].subdirectory, None);
    }

    #[test]
    fn test_sources_deduplicate_and_carry_options() {
        let mut config = settings(&[
            "https://soundcloud.com/artist/",
            "https://SoundCloud.com/artist",
            "https://soundcloud.com/other",
        ]);
        config.high_quality_enable = true;
        config.soundcloud_oauth = Some("token".into());

        let cookies = PathBuf::from("/archive/cookies.txt");
        let sources = config.sources(Some(&cookies)).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].options.quality, AudioQuality::High);
        assert_eq!(sources[0].options.auth_token.as_deref(), Some("token"));
        assert_eq!(sources[1].options.cookies_file.as_deref(), Some(cookies.as_path()));
    }

    #[test]
    fn test_sources_reject_invalid_url() {
        let config = settings(&["https://soundcloud.com/a", "not-a-url"]);
        assert!(matches!(
            config.sources(None),
            Err(ArchiveError::FatalConfig(_))
        ));
    }

    #[test]
    fn test_sources_from_url_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("url_list.ini");
        std::fs::write(&file, "[URL LIST]\nMixes = https://soundcloud.com/a/sets\n").unwrap();

        let mut config = settings(&[]);
        config.url_file = Some(file);
        assert!(config.validate().is_ok());

        let sources = config.sources(None).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].options.subdirectory.as_deref(), Some("Mixes"));
    }
}
