// Entity and URL normalization shared by every extraction strategy
//
// Page markup routinely carries URLs and captions that were HTML-escaped more
// than once (`&amp;amp;`), and CDN image links that pin a downscaled rendition
// through query keys or a `s640x640` path segment. Both helpers here are
// idempotent so they can be applied at every layer without coordination.

use regex::Regex;

/// Upper bound on full decode passes before giving up on a fixed point
pub const MAX_DECODE_PASSES: usize = 10;

/// CDN query keys that carry cache, signature or size hints
const CONSTRAINT_QUERY_KEYS: &[&str] = &[
    "stp",
    "efg",
    "_nc_cat",
    "_nc_ohc",
    "_nc_ht",
    "_nc_gid",
    "ig_cache_key",
    "ccb",
    "oh",
    "oe",
];

lazy_static::lazy_static! {
    static ref SIZE_SEGMENT_RE: Regex =
        Regex::new(r"^[sp]\d{2,5}x\d{2,5}(?:_[A-Za-z0-9.]+)?$").unwrap();
}

/// Decode HTML entities until the text stops changing.
///
/// Handles named, decimal and hex references (code-point aware). Nested
/// encodings like `&amp;amp;quot;` unwind one level per pass. If the text is
/// still changing after [`MAX_DECODE_PASSES`], the partially decoded text is
/// returned.
pub fn decode_entities(text: &str) -> String {
    let mut current = text.to_string();

    for _ in 0..MAX_DECODE_PASSES {
        let decoded = html_escape::decode_html_entities(&current);
        if decoded == current {
            return current;
        }
        current = decoded.into_owned();
    }

    current
}

/// Remove size/caching constraints from a CDN image URL.
///
/// Never apply this to video locators: those already reference one concrete
/// rendition and the signature is required.
pub fn strip_size_constraints(url: &str) -> String {
    let (without_fragment, fragment) = match url.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (url, None),
    };

    let (path, query) = match without_fragment.split_once('?') {
        Some((p, q)) => (p, q),
        None => (without_fragment, ""),
    };

    let mut result = strip_size_segments(path);

    let kept: Vec<&str> = query
        .split(['&', '?'])
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !CONSTRAINT_QUERY_KEYS.contains(&key)
        })
        .collect();

    if !kept.is_empty() {
        result.push('?');
        result.push_str(&kept.join("&"));
    }

    if let Some(frag) = fragment {
        result.push('#');
        result.push_str(frag);
    }

    result
}

/// Full treatment for an image locator: decode, then drop size constraints
pub fn normalize_image_url(raw: &str) -> String {
    strip_size_constraints(decode_entities(raw.trim()).as_str())
}

/// Video locators are decoded only; they already name one rendition
pub fn normalize_video_url(raw: &str) -> String {
    decode_entities(raw.trim())
}

/// Decoded, whitespace-trimmed caption or author text
pub fn normalize_text(raw: &str) -> String {
    decode_entities(raw).trim().to_string()
}

/// Drop `/s640x640/`-style path segments, keeping the scheme and host intact
fn strip_size_segments(path: &str) -> String {
    // Skip "scheme://host" so the authority is never inspected as a segment
    let path_start = match path.find("://") {
        Some(i) => path[i + 3..].find('/').map_or(path.len(), |j| i + 3 + j),
        None => 0,
    };

    let (authority, rest) = path.split_at(path_start);

    let segments: Vec<&str> = rest
        .split('/')
        .filter(|seg| !SIZE_SEGMENT_RE.is_match(seg))
        .collect();

    format!("{}{}", authority, segments.join("/"))
}
