//! Tag writing backed by `lofty`.

use crate::extractor::TagSet;
use crate::utils::error::{ArchiveError, ArchiveResult};
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use lofty::read_from_path;
use lofty::tag::{ItemKey, Tag};
use std::io;
use std::path::Path;
use tracing::debug;

/// Write `tags` into the audio file at `path`.
///
/// Runs on the blocking pool; failures surface as `OrganizerIo` so the item
/// is never recorded with missing tags.
pub async fn write_tags(path: &Path, tags: &TagSet) -> ArchiveResult<()> {
    if tags.is_empty() {
        return Ok(());
    }

    let owned_path = path.to_path_buf();
    let owned_tags = tags.clone();
    tokio::task::spawn_blocking(move || write_tags_blocking(&owned_path, &owned_tags))
        .await
        .map_err(|e| ArchiveError::organizer_io(path, io::Error::other(e)))?
}

fn tag_error(path: &Path, reason: impl ToString) -> ArchiveError {
    ArchiveError::organizer_io(path, io::Error::other(reason.to_string()))
}

fn write_tags_blocking(path: &Path, tags: &TagSet) -> ArchiveResult<()> {
    let mut tagged_file = read_from_path(path).map_err(|e| tag_error(path, e))?;
    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| tag_error(path, format!("no writable tag for {:?}", tag_type)))?;

    if let Some(title) = &tags.title {
        tag.set_title(title.clone());
    }
    if let Some(artist) = &tags.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(album) = &tags.album {
        tag.set_album(album.clone());
    }
    if let Some(album_artist) = &tags.album_artist {
        tag.remove_key(ItemKey::AlbumArtist);
        tag.insert_text(ItemKey::AlbumArtist, album_artist.clone());
    }
    if let Some(comment) = &tags.comment {
        tag.set_comment(comment.clone());
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| tag_error(path, e))?;

    debug!("Wrote tags to {}", path.display());
    Ok(())
}
