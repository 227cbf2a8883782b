// Embedded-script JSON search
//
// Scripts that mention a media field are cut into balanced `{...}` regions,
// each region is parsed on its own, and every parsed object is searched for
// a media node. A region that fails to parse is skipped; the scan resumes just
// past its opening brace so a valid object nested inside (or following) it
// is still found.

use scraper::{Html, Selector};
use serde_json::Value;

use super::node::{find_first, MediaNodeExtractor, MAX_SEARCH_DEPTH};
use super::traits::{ExtractionStrategy, NodeExtractor, PageSource};
use crate::resolver::models::MediaRecord;

/// Substrings that make a script worth parsing
pub const MEDIA_MARKERS: &[&str] = &[
    "video_url",
    "video_versions",
    "display_url",
    "display_resources",
    "image_versions2",
];

pub struct EmbeddedScriptStrategy {
    extractor: MediaNodeExtractor,
}

impl EmbeddedScriptStrategy {
    pub fn new() -> Self {
        Self {
            extractor: MediaNodeExtractor,
        }
    }

    /// Text of every script block that mentions a media field
    fn candidate_scripts(html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(selector) = Selector::parse("script") else {
            return Vec::new();
        };

        document
            .select(&selector)
            .map(|el| el.text().collect::<String>())
            .filter(|text| MEDIA_MARKERS.iter().any(|m| text.contains(m)))
            .collect()
    }

    fn search_script(&self, text: &str) -> Option<MediaRecord> {
        let mut pos = 0;

        loop {
            let start = pos + text[pos..].find('{')?;

            let Some(end) = matching_brace(text, start) else {
                pos = start + 1;
                continue;
            };

            match serde_json::from_str::<Value>(&text[start..=end]) {
                Ok(value) => {
                    let found = find_first(&value, MAX_SEARCH_DEPTH, |node| {
                        self.extractor.try_extract(node)
                    });
                    if found.is_some() {
                        return found;
                    }
                    pos = end + 1;
                }
                Err(e) => {
                    tracing::trace!(offset = start, error = %e, "skipping malformed JSON region");
                    // A region with no object literal inside cannot hide a valid one
                    pos = if has_object_literal(&text[start + 1..end]) {
                        start + 1
                    } else {
                        end + 1
                    };
                }
            }
        }
    }
}

impl Default for EmbeddedScriptStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionStrategy for EmbeddedScriptStrategy {
    fn id(&self) -> &'static str {
        "embedded-script-json"
    }

    fn attempt(&self, source: &PageSource) -> Option<MediaRecord> {
        Self::candidate_scripts(&source.html)
            .iter()
            .find_map(|script| self.search_script(script))
    }
}

/// Whether `text` holds a `{` whose first non-blank follower opens a JSON key
fn has_object_literal(text: &str) -> bool {
    text.match_indices('{')
        .any(|(i, _)| text[i + 1..].trim_start().starts_with('"'))
}

/// Byte index of the `}` closing the `{` at `start`, honoring JSON strings
pub(crate) fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::models::MediaType;

    fn source(html: &str) -> PageSource {
        PageSource::new("https://www.instagram.com/p/ABC123/", html)
    }

    #[test]
    fn test_matching_brace_skips_strings() {
        let text = r#"x = {"a": "}{", "b": {"c": "\"}"}} tail"#;
        let start = text.find('{').unwrap();
        let end = matching_brace(text, start).unwrap();
        assert_eq!(&text[end..], "} tail");
        assert!(matching_brace("{ never closed", 0).is_none());
    }

    #[test]
    fn test_nested_media_node_found() {
        let html = r#"<html><script type="application/json">{"require":[["x",{"data":{"items":[{"video_versions":[{"url":"https://cdn/low.mp4","width":360,"height":640},{"url":"https://cdn/high.mp4","width":720,"height":1280}],"user":{"username":"deep"}}]}}]]}</script></html>"#;
        let rec = EmbeddedScriptStrategy::new().attempt(&source(html)).unwrap();
        assert_eq!(rec.media_type, MediaType::Video);
        assert_eq!(rec.media_url, "https://cdn/high.mp4");
        assert_eq!(rec.author, "deep");
    }

    #[test]
    fn test_malformed_region_does_not_abort_scan() {
        let html = r#"<script>var a = {"display_url": oops, }; var b = {"display_url":"https://cdn/ok.jpg","owner":{"username":"fine"}};</script>"#;
        let rec = EmbeddedScriptStrategy::new().attempt(&source(html)).unwrap();
        assert_eq!(rec.media_url, "https://cdn/ok.jpg");
        assert_eq!(rec.author, "fine");
    }

    #[test]
    fn test_many_code_blocks_before_object() {
        let mut script = String::new();
        for n in 0..300 {
            script.push_str(&format!("function f{}(){{return {};}}\n", n, n));
        }
        script.push_str(r#"var b = {"display_url":"https://cdn/ok.jpg"};"#);
        let html = format!("<script>{}</script>", script);

        let rec = EmbeddedScriptStrategy::new().attempt(&source(&html)).unwrap();
        assert_eq!(rec.media_url, "https://cdn/ok.jpg");
    }

    #[test]
    fn test_first_script_match_wins() {
        let html = r#"<script>{"display_url":"https://cdn/first.jpg"}</script><script>{"video_url":"https://cdn/second.mp4"}</script>"#;
        let rec = EmbeddedScriptStrategy::new().attempt(&source(html)).unwrap();
        assert_eq!(rec.media_url, "https://cdn/first.jpg");
    }

    #[test]
    fn test_scripts_without_markers_are_ignored() {
        let html = r#"<script>{"foo":"bar"}</script><p>{"display_url":"https://cdn/not-in-script.jpg"}</p>"#;
        assert!(EmbeddedScriptStrategy::new().attempt(&source(html)).is_none());
    }
}
