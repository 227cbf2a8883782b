// Resolution pipeline - ordered strategies with a browser fallback
//
// Strategies run cheapest and most specific first; the first record with a
// media URL wins. Time-based posts whose page only exposed a still image get
// a second chance through the browser fallback.

use std::sync::Arc;

use super::diagnostics::build_diagnostics;
use super::embedded::EmbeddedScriptStrategy;
use super::inline::InlineFieldStrategy;
use super::json_ld::JsonLdStrategy;
use super::meta::MetaTagStrategy;
use super::shared_data::SharedDataStrategy;
use super::traits::{ExtractionStrategy, PageSource};
use crate::resolver::browser::BrowserFallback;
use crate::resolver::errors::ResolveError;
use crate::resolver::fetcher::PageFetcher;
use crate::resolver::models::{ExtractionAttempt, MediaRecord, UNKNOWN_AUTHOR};
use crate::resolver::utils::{is_time_based_url, parse_post_url};

pub struct MediaPipeline {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    fetcher: Arc<dyn PageFetcher>,
    fallback: Option<Arc<dyn BrowserFallback>>,
}

impl MediaPipeline {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            strategies: Self::default_strategies(),
            fetcher,
            fallback: None,
        }
    }

    /// Inline fields, embedded JSON, JSON-LD, legacy blob, then meta tags
    pub fn default_strategies() -> Vec<Box<dyn ExtractionStrategy>> {
        vec![
            Box::new(InlineFieldStrategy),
            Box::new(EmbeddedScriptStrategy::new()),
            Box::new(JsonLdStrategy),
            Box::new(SharedDataStrategy),
            Box::new(MetaTagStrategy),
        ]
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn BrowserFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn strategy_ids(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.id()).collect()
    }

    /// Validate, fetch and resolve one post URL
    pub async fn resolve(&self, url: &str) -> Result<MediaRecord, ResolveError> {
        let post = parse_post_url(url)?;
        let url = url.trim();
        tracing::info!(url, shortcode = %post.shortcode, kind = ?post.kind, "resolving post");

        let html = self.fetcher.fetch(url).await?;
        self.resolve_html(url, &html).await
    }

    /// Resolve from an already fetched page body
    pub async fn resolve_html(&self, url: &str, html: &str) -> Result<MediaRecord, ResolveError> {
        let source = PageSource::new(url, html);
        let (textual, attempts) = self.run_strategies(&source);

        let wants_fallback = is_time_based_url(url)
            && textual.as_ref().map_or(true, |r| !r.media_type.is_video());

        let mut fallback_tried = false;
        let result = match (&self.fallback, wants_fallback) {
            (Some(fallback), true) => {
                fallback_tried = true;
                tracing::info!(url, has_textual = textual.is_some(), "trying browser fallback");

                match fallback.capture(url).await {
                    Ok(Some(record)) if record.media_type.is_video() && record.has_media() => {
                        tracing::info!(url, "browser fallback produced a video");
                        Some(record)
                    }
                    Ok(_) => textual,
                    Err(e) if textual.is_none() => {
                        tracing::warn!(url, error = %e, "browser fallback failed with no page result");
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(url, error = %e, "browser fallback failed, keeping page result");
                        textual
                    }
                }
            }
            _ => textual,
        };

        match result {
            Some(record) => Ok(finalize(record)),
            None => {
                let diagnostics = build_diagnostics(html, &attempts, fallback_tried);
                tracing::warn!(
                    url,
                    html_length = diagnostics.html_length,
                    markers = ?diagnostics.markers_present,
                    cause = ?diagnostics.likely_cause,
                    "no media found"
                );
                Err(ResolveError::NotFound(diagnostics))
            }
        }
    }

    /// First strategy with a media URL wins; every attempt is recorded
    fn run_strategies(&self, source: &PageSource) -> (Option<MediaRecord>, Vec<ExtractionAttempt>) {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let record = strategy.attempt(source).filter(MediaRecord::has_media);
            let matched = record.is_some();
            tracing::debug!(strategy = strategy.id(), matched, "extraction attempt");

            attempts.push(ExtractionAttempt {
                strategy_id: strategy.id(),
                matched,
                record: record.clone(),
            });

            if matched {
                return (record, attempts);
            }
        }

        (None, attempts)
    }
}

fn finalize(mut record: MediaRecord) -> MediaRecord {
    record.media_url = record.media_url.trim().to_string();
    record.caption = record.caption.trim().to_string();
    if record.author.trim().is_empty() {
        record.author = UNKNOWN_AUTHOR.to_string();
    }
    record
}
