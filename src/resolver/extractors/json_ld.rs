// Structured-data (JSON-LD) block

use scraper::{Html, Selector};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::traits::{ExtractionStrategy, PageSource};
use crate::resolver::models::MediaRecord;
use crate::resolver::normalize::{normalize_image_url, normalize_text, normalize_video_url};

pub struct JsonLdStrategy;

impl JsonLdStrategy {
    fn parse_block(html: &str) -> Option<Value> {
        let document = Html::parse_document(html);
        let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
        let text: String = document.select(&selector).next()?.text().collect();
        let value: Value = serde_json::from_str(text.trim()).ok()?;

        // Some pages wrap the single entity in an array
        match value {
            Value::Array(items) => items.into_iter().find(Value::is_object),
            other => Some(other),
        }
    }

    /// First string found in a value that may be a string, an object with `url`, or an array of either
    fn first_url(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Object(map) => map
                .get("contentUrl")
                .or_else(|| map.get("url"))
                .and_then(Self::first_url),
            Value::Array(items) => items.iter().find_map(Self::first_url),
            _ => None,
        }
    }

    fn author(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("alternateName")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .map(|s| s.trim_start_matches('@').to_string()),
            Value::Array(items) => items.iter().find_map(Self::author),
            _ => None,
        }
    }

    fn date(data: &Value) -> Option<OffsetDateTime> {
        ["uploadDate", "dateCreated", "datePublished"]
            .iter()
            .filter_map(|key| data[*key].as_str())
            .find_map(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
    }
}

impl ExtractionStrategy for JsonLdStrategy {
    fn id(&self) -> &'static str {
        "json-ld"
    }

    fn attempt(&self, source: &PageSource) -> Option<MediaRecord> {
        let data = Self::parse_block(&source.html)?;

        let video = Self::first_url(&data["contentUrl"])
            .filter(|_| data["@type"].as_str() == Some("VideoObject"))
            .or_else(|| Self::first_url(&data["video"]));
        let image = Self::first_url(&data["image"]).or_else(|| {
            Self::first_url(&data["contentUrl"]).filter(|_| data["@type"].as_str() != Some("VideoObject"))
        });
        let thumbnail = Self::first_url(&data["thumbnailUrl"]).map(|u| normalize_image_url(&u));

        let record = match (video, image) {
            (Some(v), img) => MediaRecord::video(normalize_video_url(&v))
                .with_thumbnail(thumbnail.or_else(|| img.map(|i| normalize_image_url(&i)))),
            (None, Some(i)) => MediaRecord::image(normalize_image_url(&i)),
            (None, None) => return None,
        };

        if !record.has_media() {
            return None;
        }

        let caption = ["caption", "articleBody", "description"]
            .iter()
            .find_map(|key| data[*key].as_str())
            .map(normalize_text);

        Some(
            record
                .with_caption(caption)
                .with_author(Self::author(&data["author"]).map(|a| normalize_text(&a)))
                .with_timestamp(Self::date(&data)),
        )
    }
}
