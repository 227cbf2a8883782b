// QualitySelector - picks the best rendition among page-offered variants
//
// Handles:
// - Image renditions (largest pixel area wins, stable on ties)
// - Captured video streams (quality token priority, discovery order fallback)

use super::models::DisplayResource;

/// Default quality tokens for captured video URLs, best first
pub const DEFAULT_VIDEO_QUALITY_TOKENS: &[&str] = &[
    "1080p", "1080", "720p", "720", "640", "540p", "480p", "480", "360p", "360",
];

pub struct QualitySelector;

impl QualitySelector {
    /// Largest-area candidate; on equal area the earliest one wins.
    pub fn select_best_image(candidates: &[DisplayResource]) -> Option<&DisplayResource> {
        let mut best: Option<&DisplayResource> = None;

        for candidate in candidates {
            match best {
                // Strictly greater keeps the first of equal-area candidates
                Some(current) if candidate.area() <= current.area() => {}
                _ => best = Some(candidate),
            }
        }

        best
    }

    /// First URL carrying the highest-priority token present anywhere in the set.
    ///
    /// Falls back to the first captured URL when no token matches.
    pub fn select_best_video<'a, S: AsRef<str>>(
        urls: &'a [String],
        priority_tokens: &[S],
    ) -> Option<&'a str> {
        for token in priority_tokens {
            let token = token.as_ref();
            if let Some(url) = urls.iter().find(|u| u.contains(token)) {
                return Some(url.as_str());
            }
        }

        urls.first().map(String::as_str)
    }
}
