use crate::extractor::models::{FetchOptions, FetchedMedia, Item, Source};
use crate::utils::error::ArchiveResult;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazily produced items of one enumeration pass.
pub type ItemStream = BoxStream<'static, ArchiveResult<Item>>;

/// Core trait for the external extraction and conversion capability
///
/// This trait isolates the archive loop from the tool doing the platform
/// specific work (yt-dlp in production, scripted fakes in tests). Errors are
/// reported as `TransientFetch` (retryable) or `FatalConfig` (not retryable).
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Returns a unique identifier for this extractor (e.g., "yt-dlp")
    fn id(&self) -> &'static str;

    /// Lists the items currently published by the source.
    ///
    /// One finite pass per call. Ordering may change between calls.
    async fn enumerate(&self, source: &Source) -> ArchiveResult<ItemStream>;

    /// Downloads and converts one item into `options.staging_dir`.
    ///
    /// May take minutes. Callers only cancel between items.
    async fn fetch_and_convert(
        &self,
        source: &Source,
        item: &Item,
        options: &FetchOptions,
    ) -> ArchiveResult<FetchedMedia>;
}
