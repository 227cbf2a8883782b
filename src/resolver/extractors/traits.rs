// Extraction strategy contract and common types

use serde_json::Value;

use crate::resolver::models::MediaRecord;
use crate::resolver::utils;

/// A fetched page handed to every strategy
#[derive(Debug, Clone)]
pub struct PageSource {
    /// Post URL the page was fetched for
    pub url: String,
    /// Raw response body
    pub html: String,
}

impl PageSource {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    /// Identifying path segment of the post URL
    pub fn shortcode(&self) -> Option<String> {
        utils::shortcode_of(&self.url)
    }
}

/// One self-contained way of recovering a media locator from a page.
///
/// Implementations must be pure with respect to the given source so they can
/// be reordered or dropped when the platform's markup moves on.
pub trait ExtractionStrategy: Send + Sync {
    /// Stable id (for logging and diagnostics)
    fn id(&self) -> &'static str;

    /// Record with a non-empty media URL, or None when this strategy does not apply
    fn attempt(&self, source: &PageSource) -> Option<MediaRecord>;
}

/// Recognizes a media-bearing node inside untyped JSON
pub trait NodeExtractor {
    fn try_extract(&self, node: &Value) -> Option<MediaRecord>;
}
