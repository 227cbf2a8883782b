// Post URL -> media resolution

pub mod browser;
pub mod errors;
pub mod extractors;
pub mod fetcher;
pub mod models;
pub mod muxer;
pub mod normalize;
pub mod quality_selector;
pub mod utils;

pub use browser::{BrowserConfig, BrowserFallback, ChromeFallback, StreamMarkers};
pub use errors::{MuxError, ResolveError, SourceDiagnostics};
pub use extractors::MediaPipeline;
pub use fetcher::{HttpFetcher, PageFetcher};
pub use models::{MediaRecord, MediaType, MergedMedia};
pub use muxer::{HttpStreamDownloader, MediaMuxer, MuxerConfig, StreamDownloader};
pub use quality_selector::QualitySelector;
