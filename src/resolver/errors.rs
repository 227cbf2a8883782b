// Error types for the resolution pipeline

use serde::Serialize;

use super::extractors::PageIssue;

/// Evidence gathered when no strategy produced a media locator.
///
/// Only marker names and sizes are recorded, never page content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceDiagnostics {
    /// Known field markers that were present in the fetched page
    pub markers_present: Vec<String>,
    /// Size of the fetched page in bytes
    pub html_length: usize,
    /// Strategy ids in the order they were tried, with their outcome
    pub attempts: Vec<AttemptSummary>,
    /// Whether the browser fallback was tried
    pub browser_fallback_tried: bool,
    /// Best guess at why the page carried no media
    pub likely_cause: Option<PageIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSummary {
    pub strategy: String,
    pub matched: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Missing or malformed post URL
    #[error("Invalid URL: {0}")]
    Validation(String),

    /// Nothing in the page (nor the browser) yielded a media locator
    #[error("No media found for this post (it may be private or deleted)")]
    NotFound(SourceDiagnostics),

    /// Page fetch or browser navigation exceeded its bound
    #[error("Upstream timeout: {0}")]
    Timeout(String),

    /// Page fetch failed for a reason other than a timeout
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Browser automation failed unexpectedly
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Timeout(_) => 504,
            Self::Fetch(_) | Self::Browser(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Fetch(_) => "fetch_error",
            Self::Browser(_) => "browser_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Fetch(e.to_string())
        }
    }
}

/// Failures of the download + remux stage. Always recovered by the caller.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("stream download failed: {0}")]
    Download(String),

    #[error("remux failed: {0}")]
    Remux(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ResolveError::Validation("x".into()).http_status(), 400);
        assert_eq!(
            ResolveError::NotFound(SourceDiagnostics::default()).http_status(),
            404
        );
        assert_eq!(ResolveError::Timeout("x".into()).http_status(), 504);
        assert_eq!(ResolveError::Internal("x".into()).http_status(), 500);
        assert_eq!(ResolveError::Browser("x".into()).http_status(), 500);
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        assert!(ResolveError::Timeout("nav".into()).is_retryable());
        assert!(!ResolveError::Validation("bad".into()).is_retryable());
        assert!(!ResolveError::NotFound(SourceDiagnostics::default()).is_retryable());
    }
}
