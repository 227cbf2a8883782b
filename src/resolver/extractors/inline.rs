// Inline-field scan - regex over the raw page text
//
// Cheapest strategy and the one that survives most markup reshuffles: the
// post record is usually serialized somewhere in the page, so its well-known
// field names can be matched without understanding the surrounding structure.

use regex::Regex;
use serde_json::Value;
use time::OffsetDateTime;

use super::node::candidates_from;
use super::traits::{ExtractionStrategy, PageSource};
use crate::resolver::models::MediaRecord;
use crate::resolver::normalize::{normalize_image_url, normalize_text, normalize_video_url};
use crate::resolver::quality_selector::QualitySelector;
use crate::resolver::utils::unescape_json_string;

lazy_static::lazy_static! {
    static ref VIDEO_URL_RE: Regex = json_string_field("video_url");
    static ref DISPLAY_URL_RE: Regex = json_string_field("display_url");
    static ref DISPLAY_SRC_RE: Regex = json_string_field("display_src");
    static ref DISPLAY_RESOURCES_RE: Regex =
        Regex::new(r#""display_resources"\s*:\s*(\[[^\[\]]*\])"#).unwrap();
    static ref EDGE_CAPTION_RE: Regex = Regex::new(
        r#""edge_media_to_caption"\s*:\s*\{\s*"edges"\s*:\s*\[\s*\{\s*"node"\s*:\s*\{[^{}]*?"text"\s*:\s*"((?:[^"\\]|\\.)*)""#
    ).unwrap();
    static ref CAPTION_OBJECT_RE: Regex = Regex::new(
        r#""caption"\s*:\s*\{[^{}]*?"text"\s*:\s*"((?:[^"\\]|\\.)*)""#
    ).unwrap();
    static ref OWNER_RE: Regex = Regex::new(
        r#""(?:owner|user)"\s*:\s*\{[^{}]*?"username"\s*:\s*"((?:[^"\\]|\\.)+)""#
    ).unwrap();
    static ref TAKEN_AT_RE: Regex =
        Regex::new(r#""taken_at(?:_timestamp)?"\s*:\s*(\d{9,11})"#).unwrap();
}

fn json_string_field(name: &str) -> Regex {
    Regex::new(&format!(r#""{}"\s*:\s*"((?:[^"\\]|\\.)*)""#, regex::escape(name))).unwrap()
}

fn capture_string(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| unescape_json_string(m.as_str()))
        .filter(|s| !s.trim().is_empty())
}

pub struct InlineFieldStrategy;

impl InlineFieldStrategy {
    /// Best image locator: resource array, then the best-image field, then the default field
    fn image_url(html: &str, display_url: Option<String>) -> Option<String> {
        let from_resources = DISPLAY_RESOURCES_RE
            .captures(html)
            .and_then(|c| serde_json::from_str::<Value>(&c[1]).ok())
            .map(|array| candidates_from(&array, "src"))
            .filter(|set| !set.is_empty());

        if let Some(set) = from_resources {
            return QualitySelector::select_best_image(&set).map(|r| normalize_image_url(&r.src));
        }

        capture_string(&DISPLAY_SRC_RE, html)
            .or(display_url)
            .map(|url| normalize_image_url(&url))
    }

    fn caption(html: &str) -> Option<String> {
        capture_string(&EDGE_CAPTION_RE, html)
            .or_else(|| capture_string(&CAPTION_OBJECT_RE, html))
            .map(|c| normalize_text(&c))
    }

    fn author(html: &str) -> Option<String> {
        capture_string(&OWNER_RE, html).map(|a| normalize_text(&a))
    }

    fn timestamp(html: &str) -> Option<OffsetDateTime> {
        TAKEN_AT_RE
            .captures(html)
            .and_then(|c| c[1].parse::<i64>().ok())
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
    }
}

impl ExtractionStrategy for InlineFieldStrategy {
    fn id(&self) -> &'static str {
        "inline-fields"
    }

    fn attempt(&self, source: &PageSource) -> Option<MediaRecord> {
        let html = source.html.as_str();
        let display_url = capture_string(&DISPLAY_URL_RE, html);

        let record = if let Some(video) = capture_string(&VIDEO_URL_RE, html) {
            MediaRecord::video(normalize_video_url(&video))
                .with_thumbnail(display_url.map(|u| normalize_image_url(&u)))
        } else {
            MediaRecord::image(Self::image_url(html, display_url)?)
        };

        if !record.has_media() {
            return None;
        }

        // Companion fields are best-effort and never block the media URL
        Some(
            record
                .with_caption(Self::caption(html))
                .with_author(Self::author(html))
                .with_timestamp(Self::timestamp(html)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::models::MediaType;

    fn source(html: &str) -> PageSource {
        PageSource::new("https://www.instagram.com/p/ABC123/", html)
    }

    #[test]
    fn test_video_field_wins_over_display() {
        let html = r#"<script>{"display_url":"https:\/\/cdn\/s640x640\/t.jpg?stp=1","video_url":"https:\/\/cdn\/v.mp4?_nc_ht=keep","owner":{"id":"1","username":"jane"}}</script>"#;
        let rec = InlineFieldStrategy.attempt(&source(html)).unwrap();
        assert_eq!(rec.media_type, MediaType::Video);
        assert_eq!(rec.media_url, "https://cdn/v.mp4?_nc_ht=keep");
        assert_eq!(rec.thumbnail_url.as_deref(), Some("https://cdn/t.jpg"));
        assert_eq!(rec.author, "jane");
    }

    #[test]
    fn test_resource_array_beats_default_field() {
        let html = r#"{"display_url":"https://cdn/default.jpg","display_resources":[{"src":"https://cdn/640.jpg","config_width":640,"config_height":800},{"src":"https://cdn/1080.jpg?oe=1","config_width":1080,"config_height":1350}]}"#;
        let rec = InlineFieldStrategy.attempt(&source(html)).unwrap();
        assert_eq!(rec.media_type, MediaType::Image);
        assert_eq!(rec.media_url, "https://cdn/1080.jpg");
    }

    #[test]
    fn test_best_image_field_without_resources() {
        let html = r#"{"display_url":"https://cdn/default.jpg","display_src":"https://cdn/best.jpg"}"#;
        let rec = InlineFieldStrategy.attempt(&source(html)).unwrap();
        assert_eq!(rec.media_url, "https://cdn/best.jpg");
    }

    #[test]
    fn test_companion_fields() {
        let html = r#"{"display_url":"https://cdn/a.jpg","edge_media_to_caption":{"edges":[{"node":{"text":"sunset 🌅 &amp;amp; sea"}}]},"taken_at_timestamp":1700000000}"#;
        let rec = InlineFieldStrategy.attempt(&source(html)).unwrap();
        assert_eq!(rec.caption, "sunset 🌅 & sea");
        assert_eq!(rec.author, "unknown");
        assert_eq!(rec.timestamp.unwrap().unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_no_media_fields() {
        let html = r#"{"owner":{"username":"jane"},"caption":{"text":"hi"}}"#;
        assert!(InlineFieldStrategy.attempt(&source(html)).is_none());
    }
}
