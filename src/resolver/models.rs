// Common data models for the resolver

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Author value used when no strategy could name the poster
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Kind of asset a media locator points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
}

impl MediaType {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// Resolved media for one post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    /// Direct asset URL (non-empty iff extraction succeeded)
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub caption: String,
    pub author: String,
    pub media_type: MediaType,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub timestamp: Option<OffsetDateTime>,
}

impl MediaRecord {
    pub fn image(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
            thumbnail_url: None,
            caption: String::new(),
            author: UNKNOWN_AUTHOR.to_string(),
            media_type: MediaType::Image,
            timestamp: None,
        }
    }

    pub fn video(media_url: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::Video,
            ..Self::image(media_url)
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail_url = thumbnail;
        self
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        if let Some(caption) = caption {
            self.caption = caption;
        }
        self
    }

    pub fn with_author(mut self, author: Option<String>) -> Self {
        if let Some(author) = author.filter(|a| !a.trim().is_empty()) {
            self.author = author;
        }
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<OffsetDateTime>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn has_media(&self) -> bool {
        !self.media_url.trim().is_empty()
    }
}

/// One image rendition offered by the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayResource {
    pub src: String,
    #[serde(alias = "config_width")]
    pub width: Option<u32>,
    #[serde(alias = "config_height")]
    pub height: Option<u32>,
}

impl DisplayResource {
    /// Pixel area; a missing dimension counts as zero
    pub fn area(&self) -> u64 {
        u64::from(self.width.unwrap_or(0)) * u64::from(self.height.unwrap_or(0))
    }
}

/// Ordered renditions considered for one post
pub type CandidateSet = Vec<DisplayResource>;

/// Outcome of running one extraction strategy
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub strategy_id: &'static str,
    pub matched: bool,
    pub record: Option<MediaRecord>,
}

/// Lifecycle of a merge request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeState {
    NotStarted,
    Downloading,
    Merging,
    Done,
    Failed,
}

/// Paths involved in merging one post's separate streams
#[derive(Debug, Clone)]
pub struct MergeJob {
    /// Hash of the source post URL
    pub cache_key: String,
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub output_path: PathBuf,
    pub state: MergeState,
}

impl MergeJob {
    pub fn advance(&mut self, state: MergeState) {
        tracing::debug!(key = %self.cache_key, from = ?self.state, to = ?state, "merge state");
        self.state = state;
    }
}

/// A merged file and the externally reachable link to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMedia {
    pub path: PathBuf,
    pub public_url: String,
}
