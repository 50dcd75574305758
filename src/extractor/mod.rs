pub mod models;
pub mod traits;
pub mod ytdlp;

pub use models::{
    AudioQuality, FetchOptions, FetchedMedia, Item, Source, SourceOptions, TagSet,
};
pub use traits::{Extractor, ItemStream};
pub use ytdlp::YtDlpExtractor;
