// Helper functions shared by strategies, the fetcher and the muxer

use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use super::errors::ResolveError;

/// Desktop browser identity used for page fetches and the headless session
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

lazy_static::lazy_static! {
    static ref POST_URL_RE: Regex = Regex::new(
        r"^https?://(?:www\.|m\.)?instagram\.com/(?:[A-Za-z0-9._]+/)?(p|reel|reels|tv)/([A-Za-z0-9_-]+)/?(?:[?#].*)?$"
    ).unwrap();
}

/// Kind of content a post URL names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Post,
    Reel,
    LongForm,
}

impl PostKind {
    /// Reels and long-form videos are always time-based media
    pub fn is_time_based(&self) -> bool {
        matches!(self, Self::Reel | Self::LongForm)
    }
}

/// Parsed post reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    pub kind: PostKind,
    pub shortcode: String,
}

/// Validate a post / reel / long-form video URL and pull out its shortcode
pub fn parse_post_url(url: &str) -> Result<PostRef, ResolveError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::Validation("URL is required".to_string()));
    }

    let caps = POST_URL_RE
        .captures(trimmed)
        .ok_or_else(|| ResolveError::Validation(trimmed.to_string()))?;

    let kind = match &caps[1] {
        "reel" | "reels" => PostKind::Reel,
        "tv" => PostKind::LongForm,
        _ => PostKind::Post,
    };

    Ok(PostRef {
        kind,
        shortcode: caps[2].to_string(),
    })
}

/// Whether the URL path signals time-based video content
pub fn is_time_based_url(url: &str) -> bool {
    match parse_post_url(url) {
        Ok(post) => post.kind.is_time_based(),
        Err(_) => ["/reel/", "/reels/", "/tv/"].iter().any(|m| url.contains(m)),
    }
}

/// Identifying path segment of a post URL, if any
pub fn shortcode_of(url: &str) -> Option<String> {
    parse_post_url(url).ok().map(|p| p.shortcode)
}

/// Turn the body of a JSON string literal (as captured by a regex) into text.
///
/// Falls back to the raw capture when it is not a valid JSON string body.
pub fn unescape_json_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

/// Build the HTTP client used for page fetches and stream downloads
pub fn build_http_client(
    user_agent: &str,
    proxy: Option<&str>,
    request_timeout: Option<Duration>,
) -> Result<reqwest::Client, ResolveError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10));

    if let Some(t) = request_timeout {
        builder = builder.timeout(t);
    }

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ResolveError::Internal(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ResolveError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Run a command to completion, killing it once `timeout_secs` elapse
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, String> {
    let output = TokioCommand::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(Duration::from_secs(timeout_secs), output).await {
        Ok(result) => result.map_err(|e| format!("Failed to run {}: {}", program, e)),
        Err(_) => Err(format!("Timed out after {}s", timeout_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_post_kinds() {
        let post = parse_post_url("https://www.instagram.com/p/Cx1_a-B/").unwrap();
        assert_eq!(post.kind, PostKind::Post);
        assert_eq!(post.shortcode, "Cx1_a-B");

        let reel = parse_post_url("https://instagram.com/reel/AbC123/?igsh=xyz").unwrap();
        assert_eq!(reel.kind, PostKind::Reel);
        assert_eq!(reel.shortcode, "AbC123");

        let tv = parse_post_url("https://www.instagram.com/someone/tv/Zz9/").unwrap();
        assert_eq!(tv.kind, PostKind::LongForm);
    }

    #[test]
    fn test_rejects_foreign_urls() {
        assert!(matches!(
            parse_post_url("https://example.com/p/abc"),
            Err(ResolveError::Validation(_))
        ));
        assert!(matches!(parse_post_url("   "), Err(ResolveError::Validation(_))));
        assert!(parse_post_url("https://www.instagram.com/someone/").is_err());
    }

    #[test]
    fn test_time_based_detection() {
        assert!(is_time_based_url("https://www.instagram.com/reel/abc/"));
        assert!(is_time_based_url("https://www.instagram.com/tv/abc/"));
        assert!(!is_time_based_url("https://www.instagram.com/p/abc/"));
    }

    #[test]
    fn test_unescape_json_string() {
        assert_eq!(
            unescape_json_string(r"https:\/\/cdn\/a.mp4?x=1\u0026y=2"),
            "https://cdn/a.mp4?x=1&y=2"
        );
        // Not a valid JSON string body: returned as-is
        assert_eq!(unescape_json_string(r"bad \q escape"), r"bad \q escape");
    }

    #[tokio::test]
    async fn test_run_output_reports_missing_program() {
        let err = run_output_with_timeout("definitely-not-a-real-binary-xyz", vec![], 5)
            .await
            .unwrap_err();
        assert!(err.contains("Failed to run"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_output_times_out() {
        let err = run_output_with_timeout("sleep", vec!["5".to_string()], 1)
            .await
            .unwrap_err();
        assert!(err.contains("Timed out after 1s"));
    }
}
