// Media node recognition over untyped JSON
//
// The platform ships the same post record in two shapes: the older graph
// shape (`video_url`, `display_url`, `display_resources`, `owner`) and the
// newer API shape (`video_versions`, `image_versions2`, `user`). Both are
// read here so every JSON-based strategy shares one notion of "media node".

use serde_json::Value;
use time::OffsetDateTime;

use super::traits::NodeExtractor;
use crate::resolver::models::{CandidateSet, DisplayResource, MediaRecord};
use crate::resolver::normalize::{normalize_image_url, normalize_text, normalize_video_url};
use crate::resolver::quality_selector::QualitySelector;

/// Deepest nesting level a JSON search will descend to
pub const MAX_SEARCH_DEPTH: usize = 10;

/// Depth-bounded pre-order search returning the first node `visit` accepts.
///
/// Uses an explicit stack; children are visited in document order and the
/// search stops at the first hit without looking at remaining siblings.
pub fn find_first<'a, T, F>(root: &'a Value, max_depth: usize, mut visit: F) -> Option<T>
where
    F: FnMut(&'a Value) -> Option<T>,
{
    let mut stack: Vec<(&'a Value, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if let Some(found) = visit(node) {
            return Some(found);
        }

        if depth >= max_depth {
            continue;
        }

        match node {
            Value::Object(map) => {
                for child in map.values().rev() {
                    if child.is_object() || child.is_array() {
                        stack.push((child, depth + 1));
                    }
                }
            }
            Value::Array(items) => {
                for child in items.iter().rev() {
                    if child.is_object() || child.is_array() {
                        stack.push((child, depth + 1));
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Recognizes post records in either payload shape
#[derive(Debug, Default, Clone, Copy)]
pub struct MediaNodeExtractor;

impl NodeExtractor for MediaNodeExtractor {
    fn try_extract(&self, node: &Value) -> Option<MediaRecord> {
        if !node.is_object() {
            return None;
        }

        let best_image = best_image_url(node);

        let record = if let Some(video) = video_url(node) {
            MediaRecord::video(normalize_video_url(&video)).with_thumbnail(best_image)
        } else if let Some(image) = best_image {
            MediaRecord::image(image)
        } else {
            return None;
        };

        if !record.has_media() {
            return None;
        }

        Some(
            record
                .with_caption(caption_of(node))
                .with_author(author_of(node))
                .with_timestamp(timestamp_of(node)),
        )
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn video_url(node: &Value) -> Option<String> {
    if let Some(url) = non_empty_str(&node["video_url"]) {
        return Some(url.to_string());
    }

    let versions = candidates_from(&node["video_versions"], "url");
    QualitySelector::select_best_image(&versions).map(|r| r.src.clone())
}

/// Highest-resolution image locator on the node, already normalized
fn best_image_url(node: &Value) -> Option<String> {
    let resources = candidates_from(&node["display_resources"], "src");
    if let Some(best) = QualitySelector::select_best_image(&resources) {
        return Some(normalize_image_url(&best.src));
    }

    for key in ["display_src", "display_url"] {
        if let Some(url) = non_empty_str(&node[key]) {
            return Some(normalize_image_url(url));
        }
    }

    let candidates = candidates_from(&node["image_versions2"]["candidates"], "url");
    if let Some(best) = QualitySelector::select_best_image(&candidates) {
        return Some(normalize_image_url(&best.src));
    }

    non_empty_str(&node["thumbnail_src"]).map(normalize_image_url)
}

/// Read `[{<url_key>, width|config_width, height|config_height}]` into a candidate set
pub fn candidates_from(value: &Value, url_key: &str) -> CandidateSet {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let src = non_empty_str(&item[url_key])?.to_string();
            let dim = |a: &str, b: &str| {
                item[a]
                    .as_u64()
                    .or_else(|| item[b].as_u64())
                    .and_then(|v| u32::try_from(v).ok())
            };
            Some(DisplayResource {
                src,
                width: dim("width", "config_width"),
                height: dim("height", "config_height"),
            })
        })
        .collect()
}

fn caption_of(node: &Value) -> Option<String> {
    let from_edges = &node["edge_media_to_caption"]["edges"][0]["node"]["text"];
    let candidates = [from_edges, &node["caption"]["text"], &node["caption"]];

    candidates
        .into_iter()
        .find_map(|v| v.as_str())
        .map(normalize_text)
}

fn author_of(node: &Value) -> Option<String> {
    [&node["owner"]["username"], &node["user"]["username"]]
        .into_iter()
        .find_map(non_empty_str)
        .map(normalize_text)
}

fn timestamp_of(node: &Value) -> Option<OffsetDateTime> {
    ["taken_at_timestamp", "taken_at"]
        .iter()
        .find_map(|key| node[*key].as_i64())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
}
