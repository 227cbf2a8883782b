// Extraction strategies for post pages

pub mod diagnostics;
pub mod embedded;
pub mod inline;
pub mod json_ld;
pub mod meta;
pub mod node;
pub mod orchestrator;
pub mod shared_data;
pub mod traits;

pub use diagnostics::PageIssue;
pub use embedded::EmbeddedScriptStrategy;
pub use inline::InlineFieldStrategy;
pub use json_ld::JsonLdStrategy;
pub use meta::MetaTagStrategy;
pub use node::MediaNodeExtractor;
pub use orchestrator::MediaPipeline;
pub use shared_data::SharedDataStrategy;
pub use traits::{ExtractionStrategy, NodeExtractor, PageSource};
