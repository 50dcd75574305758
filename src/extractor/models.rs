//! Data structures for monitored sources and the items they expose

use crate::utils::error::{ArchiveError, ArchiveResult};
use crate::utils::organizer::OutputOrganizer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

/// Collection folder used when an item has no playlist or uploader.
pub const DEFAULT_COLLECTION: &str = "tracks";

/// Rendered in paths and tags when the platform reports no uploader.
pub const UNKNOWN_UPLOADER: &str = "Unknown";

/// Audio quality requested from the extractor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioQuality {
    #[default]
    Standard,
    /// Requires an OAuth token on platforms that gate high quality streams.
    High,
}

/// Per-source options fixed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOptions {
    /// Optional folder between the archive root and the collection folder.
    pub subdirectory: Option<String>,
    /// Opaque authorization value handed to the extractor.
    pub auth_token: Option<String>,
    /// Netscape cookie jar for authenticated pages.
    pub cookies_file: Option<PathBuf>,
    pub quality: AudioQuality,
}

/// One monitored URL. Identity is the normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    url: String,
    pub options: SourceOptions,
}

impl Source {
    /// Parse and normalize a source URL with default options.
    pub fn parse(raw: &str) -> ArchiveResult<Self> {
        Self::with_options(raw, SourceOptions::default())
    }

    pub fn with_options(raw: &str, options: SourceOptions) -> ArchiveResult<Self> {
        Ok(Self {
            url: normalize_url(raw)?,
            options,
        })
    }

    /// Normalized URL, also the source identity.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Filesystem-safe key derived from host and path.
    pub fn slug(&self) -> String {
        let without_scheme = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        let flattened: String = without_scheme
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        OutputOrganizer::sanitize_filename(flattened.trim_matches('_'))
    }

    /// Slug suffixed with a name-based UUID of the URL. Unlike the slug it
    /// never collides between sources and stays the same across runs.
    pub fn key(&self) -> String {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, self.url.as_bytes());
        format!("{}-{}", self.slug(), id.simple())
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Source {}

impl std::hash::Hash for Source {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Normalize a source URL: lowercase scheme and host, no fragment,
/// no trailing slash on non-root paths.
pub fn normalize_url(raw: &str) -> ArchiveResult<String> {
    let trimmed = raw.trim();
    let mut parsed = Url::parse(trimmed)
        .map_err(|e| ArchiveError::FatalConfig(format!("invalid URL '{}': {}", trimmed, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ArchiveError::FatalConfig(format!(
            "unsupported URL scheme '{}' in {}",
            parsed.scheme(),
            trimmed
        )));
    }
    if parsed.host_str().is_none() {
        return Err(ArchiveError::FatalConfig(format!("URL has no host: {}", trimmed)));
    }

    parsed.set_fragment(None);
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    Ok(parsed.to_string())
}

/// One discoverable media unit, as reported by the extractor.
///
/// Field names follow the yt-dlp info dictionary so a `--dump-json` line
/// deserializes directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    /// Platform-assigned identifier, stable across polls.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub playlist: Option<String>,
    #[serde(default)]
    pub playlist_title: Option<String>,
    #[serde(default)]
    pub playlist_uploader: Option<String>,
    #[serde(default)]
    pub playlist_index: Option<u32>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub extractor: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Item {
    /// Playlist or album this item is filed under.
    pub fn collection_name(&self) -> &str {
        non_empty(&self.playlist)
            .or_else(|| non_empty(&self.playlist_title))
            .or_else(|| non_empty(&self.uploader))
            .or_else(|| non_empty(&self.channel))
            .unwrap_or(DEFAULT_COLLECTION)
    }

    /// Owner of the collection, used as Album Artist.
    pub fn collection_owner(&self) -> Option<&str> {
        non_empty(&self.playlist_uploader)
            .or_else(|| non_empty(&self.channel))
            .or_else(|| non_empty(&self.uploader))
    }

    pub fn uploader_name(&self) -> &str {
        non_empty(&self.uploader)
            .or_else(|| non_empty(&self.channel))
            .unwrap_or(UNKNOWN_UPLOADER)
    }

    /// URL handed to the extractor for the download itself.
    pub fn download_url<'a>(&'a self, source: &'a Source) -> &'a str {
        non_empty(&self.webpage_url).unwrap_or_else(|| source.url())
    }
}

/// Tags written into an archived file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    /// Embed extractor-provided artwork.
    pub embed_thumbnail: bool,
}

impl TagSet {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
            && self.comment.is_none()
    }

    /// Fill fields this set leaves empty from `other`.
    pub fn fill_from(&mut self, other: &TagSet) {
        for (field, fallback) in [
            (&mut self.title, &other.title),
            (&mut self.artist, &other.artist),
            (&mut self.album, &other.album),
            (&mut self.album_artist, &other.album_artist),
            (&mut self.comment, &other.comment),
        ] {
            if field.is_none() {
                field.clone_from(fallback);
            }
        }
    }
}

/// Options for one `fetch_and_convert` call
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Directory the extractor writes into. Never the final archive location.
    pub staging_dir: PathBuf,
    /// Convert to mp3 and embed artwork.
    pub embed_metadata: bool,
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Produced file inside the staging directory.
    pub path: PathBuf,
    /// Tags the extractor already embedded.
    pub tags: TagSet,
}

impl FetchedMedia {
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
    }
}
