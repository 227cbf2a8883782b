// Source diagnostics - explains why a fetched page yielded no media
//
// Analyzes the raw page to determine:
// - Which known field markers were present (without leaking content)
// - Whether the page looks like a login wall, a removed post or a throttle page

use serde::{Deserialize, Serialize};

use crate::resolver::errors::{AttemptSummary, SourceDiagnostics};
use crate::resolver::models::ExtractionAttempt;

/// Marker substrings worth reporting when extraction fails
const SOURCE_MARKERS: &[&str] = &[
    "video_url",
    "video_versions",
    "display_url",
    "display_resources",
    "image_versions2",
    "application/ld+json",
    "window._sharedData",
    "og:video",
    "og:image",
    "edge_media_to_caption",
    "shortcode_media",
];

/// Why a page might not expose media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageIssue {
    /// Platform served its login page instead of the post
    LoginWall,
    /// Account or post is private
    PrivateContent,
    /// Post was removed or never existed
    Removed,
    /// Platform is throttling this client
    RateLimited,
}

impl PageIssue {
    pub fn description(&self) -> &'static str {
        match self {
            Self::LoginWall => "Login wall served instead of the post",
            Self::PrivateContent => "Private account or post",
            Self::Removed => "Post removed or unavailable",
            Self::RateLimited => "Rate limited by the platform",
        }
    }
}

/// Marker substrings present in the page, in a fixed order
pub fn markers_present(html: &str) -> Vec<String> {
    SOURCE_MARKERS
        .iter()
        .filter(|m| html.contains(*m))
        .map(|m| m.to_string())
        .collect()
}

/// Best guess at why the page carried no media
pub fn diagnose_page(html: &str) -> Option<PageIssue> {
    let lower = html.to_lowercase();

    if lower.contains("\"is_private\":true") || lower.contains("this account is private") {
        return Some(PageIssue::PrivateContent);
    }

    if lower.contains("page not found")
        || lower.contains("sorry, this page isn't available")
        || lower.contains("post isn't available")
    {
        return Some(PageIssue::Removed);
    }

    if lower.contains("please wait a few minutes") || lower.contains("429 too many requests") {
        return Some(PageIssue::RateLimited);
    }

    if lower.contains("loginform") || lower.contains("/accounts/login") {
        return Some(PageIssue::LoginWall);
    }

    None
}

/// Assemble the diagnostic bundle for a failed resolution
pub fn build_diagnostics(
    html: &str,
    attempts: &[ExtractionAttempt],
    browser_fallback_tried: bool,
) -> SourceDiagnostics {
    SourceDiagnostics {
        markers_present: markers_present(html),
        html_length: html.len(),
        attempts: attempts
            .iter()
            .map(|a| AttemptSummary {
                strategy: a.strategy_id.to_string(),
                matched: a.matched,
            })
            .collect(),
        browser_fallback_tried,
        likely_cause: diagnose_page(html),
    }
}
