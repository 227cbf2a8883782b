// Legacy global-state blob (`window._sharedData = {...};`)

use serde_json::Value;

use super::embedded::matching_brace;
use super::node::{find_first, MediaNodeExtractor, MAX_SEARCH_DEPTH};
use super::traits::{ExtractionStrategy, NodeExtractor, PageSource};
use crate::resolver::models::MediaRecord;

const ASSIGNMENT_MARKER: &str = "window._sharedData";

pub struct SharedDataStrategy;

impl SharedDataStrategy {
    fn parse_blob(html: &str) -> Option<Value> {
        let marker = html.find(ASSIGNMENT_MARKER)?;
        let start = marker + html[marker..].find('{')?;
        let end = matching_brace(html, start)?;

        match serde_json::from_str(&html[start..=end]) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "global state blob is not valid JSON");
                None
            }
        }
    }
}

impl ExtractionStrategy for SharedDataStrategy {
    fn id(&self) -> &'static str {
        "legacy-shared-data"
    }

    fn attempt(&self, source: &PageSource) -> Option<MediaRecord> {
        let blob = Self::parse_blob(&source.html)?;
        let shortcode = source.shortcode();

        // The blob carries related posts too; only the record for this URL counts
        find_first(&blob, MAX_SEARCH_DEPTH, |node| {
            let code = node.get("shortcode").and_then(Value::as_str)?;
            if shortcode.as_deref().is_some_and(|wanted| wanted != code) {
                return None;
            }
            MediaNodeExtractor.try_extract(node)
        })
    }
}
