//! Archive layout: deterministic paths, tag policy and file placement

use crate::extractor::{FetchedMedia, Item, Source, TagSet};
use crate::utils::error::{ArchiveError, ArchiveResult};
use crate::utils::tagging;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Hidden directory holding in-progress downloads.
pub const STAGING_DIR: &str = ".staging";

/// Hidden directory holding ledger files.
pub const LEDGER_DIR: &str = ".ledger";

/// Cookie jar picked up from the archive root when present.
pub const COOKIES_FILE: &str = "cookies.txt";

const MAX_TITLE_LEN: usize = 150;
const MAX_UPLOADER_LEN: usize = 80;

/// Maps items to archive paths and moves finished files into place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputOrganizer {
    pub base_dir: PathBuf,
    pub settings: OrganizationSettings,
}

/// Organization configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSettings {
    /// Write title/artist/album tags into placed files.
    pub embed_metadata: bool,
    /// Replaces the collection owner as Album Artist.
    pub album_artist_override: Option<String>,
    /// Unix permission bits applied to placed files.
    pub file_mode: Option<u32>,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            embed_metadata: true,
            album_artist_override: None,
            file_mode: Some(0o666),
        }
    }
}

impl OutputOrganizer {
    pub fn new(base_dir: impl Into<PathBuf>, settings: OrganizationSettings) -> Self {
        Self {
            base_dir: base_dir.into(),
            settings,
        }
    }

    /// Create the archive root and its hidden working directories
    pub async fn create_directory_structure(&self) -> ArchiveResult<()> {
        for dir in [
            self.base_dir.clone(),
            self.base_dir.join(STAGING_DIR),
            self.ledger_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| ArchiveError::organizer_io(&dir, e))?;
        }
        debug!("Archive directories ready under {}", self.base_dir.display());
        Ok(())
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.base_dir.join(LEDGER_DIR)
    }

    /// Per-source scratch directory for the extractor. Keyed so that two
    /// sources never share one.
    pub fn staging_dir(&self, source: &Source) -> PathBuf {
        self.base_dir.join(STAGING_DIR).join(source.key())
    }

    /// `cookies.txt` in the archive root, if the user provided one.
    pub fn cookies_file(&self) -> Option<PathBuf> {
        let path = self.base_dir.join(COOKIES_FILE);
        path.is_file().then_some(path)
    }

    /// Folder an item is filed under.
    pub fn collection_dir(&self, source: &Source, item: &Item) -> PathBuf {
        let mut path = self.base_dir.clone();
        if let Some(subdir) = &source.options.subdirectory {
            path = path.join(Self::sanitize_filename(subdir));
        }
        path.join(Self::sanitize_filename(item.collection_name()))
    }

    /// `<title>-<uploader>.<ext>`, each part sanitized.
    pub fn file_name(item: &Item, ext: &str) -> String {
        let title = Self::truncate(&Self::sanitize_filename(&item.title), MAX_TITLE_LEN);
        let uploader = Self::truncate(&Self::sanitize_filename(item.uploader_name()), MAX_UPLOADER_LEN);
        format!("{}-{}.{}", title, uploader, ext)
    }

    /// Deterministic archive path for an item.
    pub fn target_path(&self, source: &Source, item: &Item, ext: &str) -> PathBuf {
        self.collection_dir(source, item).join(Self::file_name(item, ext))
    }

    /// Tags written into an item's file.
    pub fn tags_for(&self, item: &Item) -> TagSet {
        let album_artist = self
            .settings
            .album_artist_override
            .clone()
            .or_else(|| item.collection_owner().map(str::to_string));

        TagSet {
            title: Some(item.title.clone()),
            artist: Some(item.uploader_name().to_string()),
            album: Some(item.collection_name().to_string()),
            album_artist,
            comment: item
                .description
                .as_ref()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            embed_thumbnail: self.settings.embed_metadata,
        }
    }

    /// Remove leftovers of an interrupted run for this source.
    pub async fn clear_staging(&self, source: &Source) -> ArchiveResult<()> {
        let dir = self.staging_dir(source);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Cleared staging directory {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArchiveError::organizer_io(&dir, e)),
        }
    }

    /// Empty the staging directory for `source` and recreate it.
    pub async fn prepare_staging(&self, source: &Source) -> ArchiveResult<PathBuf> {
        self.clear_staging(source).await?;
        let dir = self.staging_dir(source);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ArchiveError::organizer_io(&dir, e))?;
        Ok(dir)
    }

    /// Tag the staged file, then move it to its archive path.
    ///
    /// The staged file only appears at the final path once complete, so a
    /// crash never leaves a half-written file where the archive expects one.
    pub async fn place(
        &self,
        source: &Source,
        item: &Item,
        media: &FetchedMedia,
    ) -> ArchiveResult<PathBuf> {
        if self.settings.embed_metadata {
            let mut tags = self.tags_for(item);
            tags.fill_from(&media.tags);
            tagging::write_tags(&media.path, &tags).await?;
        }

        let target = self.target_path(source, item, media.extension());
        let parent = target.parent().unwrap_or(&self.base_dir).to_path_buf();
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| ArchiveError::organizer_io(&parent, e))?;

        if fs::try_exists(&target).await.unwrap_or(false) {
            warn!(
                "Replacing unrecorded file at {} (left by an interrupted run)",
                target.display()
            );
        }

        Self::move_file(&media.path, &target).await?;
        self.apply_permissions(&target).await;

        info!("Archived {}", target.display());
        Ok(target)
    }

    async fn move_file(from: &Path, to: &Path) -> ArchiveResult<()> {
        if fs::rename(from, to).await.is_ok() {
            return Ok(());
        }

        // Different filesystem: copy next to the target, then rename into place
        let partial = to.with_extension("part");
        fs::copy(from, &partial)
            .await
            .map_err(|e| ArchiveError::organizer_io(&partial, e))?;
        fs::rename(&partial, to)
            .await
            .map_err(|e| ArchiveError::organizer_io(to, e))?;
        if let Err(e) = fs::remove_file(from).await {
            warn!("Failed to remove staged file {}: {}", from.display(), e);
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn apply_permissions(&self, path: &Path) {
        use std::os::unix::fs::PermissionsExt;

        if let Some(mode) = self.settings.file_mode {
            if let Err(e) = fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await {
                warn!("Could not set permissions on {}: {}", path.display(), e);
            }
        }
    }

    #[cfg(not(unix))]
    async fn apply_permissions(&self, _path: &Path) {}

    /// Sanitizes a path component by removing invalid characters and traversal sequences.
    ///
    /// # Examples
    /// ```
    /// use trackvault::utils::organizer::OutputOrganizer;
    /// assert_eq!(OutputOrganizer::sanitize_filename("../../etc/passwd"), "_etc_passwd");
    /// assert_eq!(OutputOrganizer::sanitize_filename(".hidden"), "hidden");
    /// assert_eq!(OutputOrganizer::sanitize_filename("AC/DC: Live"), "AC_DC_ Live");
    /// ```
    pub fn sanitize_filename(name: &str) -> String {
        // Characters invalid on Windows/macOS/Linux filesystems
        let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

        let mut sanitized: String = name
            .replace("..", "")
            .chars()
            .map(|c| {
                if invalid_chars.contains(&c) || c.is_control() {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        // No hidden files, no trailing dots or spaces (Windows)
        sanitized = sanitized
            .trim()
            .trim_start_matches('.')
            .trim_end_matches('.')
            .trim_end()
            .to_string();

        while sanitized.contains("__") {
            sanitized = sanitized.replace("__", "_");
        }

        if sanitized.is_empty() {
            return "unnamed".to_string();
        }

        Self::truncate(&sanitized, 200)
    }

    /// Cut to at most `max_len` bytes on a char boundary.
    fn truncate(value: &str, max_len: usize) -> String {
        if value.len() <= max_len {
            return value.to_string();
        }
        let mut end = max_len;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value[..end].trim_end().to_string()
    }
}
