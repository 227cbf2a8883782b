// Meta-tag fallback (Open Graph)

use regex::Regex;
use scraper::{Html, Selector};

use super::traits::{ExtractionStrategy, PageSource};
use crate::resolver::models::MediaRecord;
use crate::resolver::normalize::{normalize_image_url, normalize_text, normalize_video_url};

lazy_static::lazy_static! {
    // "Jane Doe (@jane) • Instagram photos and videos"
    static ref HANDLE_RE: Regex = Regex::new(r"\(@([A-Za-z0-9._]+)\)").unwrap();
    // "jane on Instagram: \"caption\""
    static ref ON_PLATFORM_RE: Regex = Regex::new(r"^(.+?) on Instagram\b").unwrap();
    // "12 likes, 3 comments - jane on March 1, 2024: \"caption\"."
    static ref QUOTED_CAPTION_RE: Regex = Regex::new(r#"(?s):\s*["“](.*)["”]\.?\s*$"#).unwrap();
}

pub struct MetaTagStrategy;

/// The meta tags this strategy reads, collected in one pass
#[derive(Debug, Default)]
struct OpenGraph {
    video: Option<String>,
    image: Option<String>,
    description: Option<String>,
    title: Option<String>,
}

impl OpenGraph {
    fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let mut og = Self::default();
        let Ok(selector) = Selector::parse("meta[content]") else {
            return og;
        };

        for el in document.select(&selector) {
            let attrs = el.value();
            let key = attrs.attr("property").or_else(|| attrs.attr("name"));
            let Some(content) = attrs.attr("content").map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };

            let slot = match key {
                Some("og:video:secure_url") | Some("og:video") | Some("og:video:url") => &mut og.video,
                Some("og:image") | Some("og:image:secure_url") => &mut og.image,
                Some("og:description") | Some("description") => &mut og.description,
                Some("og:title") => &mut og.title,
                _ => continue,
            };

            // First occurrence wins
            if slot.is_none() {
                *slot = Some(content.to_string());
            }
        }

        og
    }
}

/// Author from a conventional title suffix
fn author_from_title(title: &str) -> Option<String> {
    let title = normalize_text(title);
    if let Some(c) = HANDLE_RE.captures(&title) {
        return Some(c[1].to_string());
    }
    ON_PLATFORM_RE
        .captures(&title)
        .map(|c| c[1].trim().to_string())
        .filter(|a| !a.is_empty())
}

fn caption_from_description(description: &str) -> String {
    let description = normalize_text(description);
    QUOTED_CAPTION_RE
        .captures(&description)
        .map(|c| c[1].trim().to_string())
        .unwrap_or(description)
}

impl ExtractionStrategy for MetaTagStrategy {
    fn id(&self) -> &'static str {
        "meta-tags"
    }

    fn attempt(&self, source: &PageSource) -> Option<MediaRecord> {
        let og = OpenGraph::from_html(&source.html);
        let image = og.image.as_deref().map(normalize_image_url);

        let record = match og.video.as_deref() {
            Some(video) => MediaRecord::video(normalize_video_url(video)).with_thumbnail(image),
            None => MediaRecord::image(image?),
        };

        if !record.has_media() {
            return None;
        }

        Some(
            record
                .with_caption(og.description.as_deref().map(caption_from_description))
                .with_author(og.title.as_deref().and_then(author_from_title)),
        )
    }
}
