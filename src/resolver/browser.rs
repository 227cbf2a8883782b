// Browser fallback - loads the post in headless Chrome and captures media streams
//
// Used when the static page yields no video for a time-based post. Stream URLs
// are collected from network responses while the page plays; caption and
// author are read from the rendered DOM.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeLaunchConfig};
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::{EventLifecycleEvent, SetLifecycleEventsEnabledParams};
use chromiumoxide::handler::viewport::Viewport;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::errors::ResolveError;
use super::models::MediaRecord;
use super::muxer::MediaMuxer;
use super::normalize::normalize_text;
use super::quality_selector::{QualitySelector, DEFAULT_VIDEO_QUALITY_TOKENS};
use super::utils::DEFAULT_USER_AGENT;

/// Query parameters that pin a captured stream URL to one byte range
const BYTE_RANGE_KEYS: &[&str] = &["bytestart", "byteend"];

/// Reads caption and author from the rendered page
const PAGE_SCAN_SCRIPT: &str = r#"
(() => {
  const meta = (key) => {
    const el = document.querySelector(`meta[property="${key}"]`) || document.querySelector(`meta[name="${key}"]`);
    return el ? el.getAttribute('content') : null;
  };
  let caption = meta('og:description');
  const h1 = document.querySelector('article h1, h1');
  if (h1 && h1.innerText && h1.innerText.trim().length > 0) caption = h1.innerText;
  let author = null;
  const title = meta('og:title') || document.title || '';
  const m = title.match(/\(@([A-Za-z0-9._]+)\)/) || title.match(/^(.+?) on Instagram/);
  if (m) author = m[1];
  if (!author) {
    for (const s of document.querySelectorAll('script')) {
      const u = (s.textContent || '').match(/"username":"([A-Za-z0-9._]+)"/);
      if (u) { author = u[1]; break; }
    }
  }
  return { caption, author };
})()
"#;

/// Anything that can recover a video record by actually playing the post
#[async_trait]
pub trait BrowserFallback: Send + Sync {
    /// `Ok(None)` when the page played but no video stream was observed
    async fn capture(&self, url: &str) -> Result<Option<MediaRecord>, ResolveError>;
}

/// URL substrings used to sort captured network responses
#[derive(Debug, Clone)]
pub struct StreamMarkers {
    /// Hosts that serve post media; everything else is ignored
    pub cdn: Vec<String>,
    pub audio: Vec<String>,
    pub video: Vec<String>,
    pub thumbnail: Vec<String>,
}

impl Default for StreamMarkers {
    fn default() -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            cdn: owned(&["cdninstagram", "fbcdn"]),
            audio: owned(&["audio", "heaac", "_a.mp4"]),
            video: owned(&[".mp4", "video", "dash"]),
            thumbnail: owned(&[".jpg", ".jpeg", ".webp"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Chrome/Chromium binary; autodetected when None
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout: Duration,
    /// Extra wait after navigation so playback requests fire
    pub settle: Duration,
    pub video_quality_tokens: Vec<String>,
    pub markers: StreamMarkers,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport_width: 1080,
            viewport_height: 1920,
            navigation_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(5),
            video_quality_tokens: DEFAULT_VIDEO_QUALITY_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            markers: StreamMarkers::default(),
        }
    }
}

/// What a network response carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Thumbnail,
}

/// Sort a response by URL markers; the MIME type only decides when no marker matches
pub fn classify_response(url: &str, mime_type: &str, markers: &StreamMarkers) -> Option<StreamKind> {
    let lower = url.to_lowercase();
    if !markers.cdn.iter().any(|m| lower.contains(m.as_str())) {
        return None;
    }

    let has = |list: &[String]| list.iter().any(|m| lower.contains(m.as_str()));

    if has(&markers.audio) {
        Some(StreamKind::Audio)
    } else if has(&markers.video) {
        Some(StreamKind::Video)
    } else if has(&markers.thumbnail) {
        Some(StreamKind::Thumbnail)
    } else if mime_type.starts_with("audio/") {
        Some(StreamKind::Audio)
    } else if mime_type.starts_with("video/") {
        Some(StreamKind::Video)
    } else if mime_type.starts_with("image/") {
        Some(StreamKind::Thumbnail)
    } else {
        None
    }
}

/// Drop `bytestart`/`byteend` so the URL addresses the whole stream
pub fn strip_byte_range(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !pair.is_empty() && !BYTE_RANGE_KEYS.contains(&key)
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

/// Streams observed during one page load, in discovery order
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CapturedStreams {
    pub videos: Vec<String>,
    pub audios: Vec<String>,
    pub thumbnail: Option<String>,
}

impl CapturedStreams {
    pub fn observe(&mut self, url: &str, mime_type: &str, markers: &StreamMarkers) {
        match classify_response(url, mime_type, markers) {
            Some(StreamKind::Audio) => push_unique(&mut self.audios, strip_byte_range(url)),
            Some(StreamKind::Video) => push_unique(&mut self.videos, strip_byte_range(url)),
            Some(StreamKind::Thumbnail) if self.thumbnail.is_none() => {
                self.thumbnail = Some(url.to_string())
            }
            _ => {}
        }
    }
}

fn push_unique(list: &mut Vec<String>, url: String) {
    if !list.contains(&url) {
        list.push(url);
    }
}

/// Wait for the `networkIdle` lifecycle event of a fresh navigation.
///
/// Events before the navigation's `init` belong to the blank start page.
/// Returns false when the stream ends first.
async fn wait_for_network_idle<S>(mut names: S) -> bool
where
    S: Stream<Item = String> + Unpin,
{
    let mut navigating = false;
    while let Some(name) = names.next().await {
        match name.as_str() {
            "init" => navigating = true,
            "networkIdle" if navigating => return true,
            _ => {}
        }
    }
    false
}

/// Text recovered from the rendered DOM
#[derive(Debug, Default, Deserialize)]
struct PageScan {
    caption: Option<String>,
    author: Option<String>,
}

/// One launched browser plus its CDP handler task.
///
/// Call `close()` on every path; dropping without it still stops the handler
/// and the browser process goes down with `Browser`.
struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: &BrowserConfig) -> Result<Self, ResolveError> {
        let mut builder = ChromeLaunchConfig::builder()
            .viewport(Some(Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: true,
                is_landscape: false,
                has_touch: true,
            }))
            .args(vec![
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-gpu",
                "--mute-audio",
                "--autoplay-policy=no-user-gesture-required",
                "--disable-blink-features=AutomationControlled",
            ]);

        if let Some(path) = &config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let launch_config = builder
            .build()
            .map_err(|e| ResolveError::Browser(format!("Browser config error: {}", e)))?;

        let (browser, mut handler) = Browser::launch(launch_config)
            .await
            .map_err(|e| ResolveError::Browser(format!("Failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        Ok(Self {
            browser: Some(browser),
            handler,
        })
    }

    fn browser(&self) -> Result<&Browser, ResolveError> {
        self.browser
            .as_ref()
            .ok_or_else(|| ResolveError::Internal("browser session already closed".to_string()))
    }

    async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!(error = %e, "failed to close browser (non-fatal)");
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Headless Chrome implementation of the fallback
pub struct ChromeFallback {
    config: BrowserConfig,
    muxer: Arc<MediaMuxer>,
}

impl ChromeFallback {
    pub fn new(config: BrowserConfig, muxer: Arc<MediaMuxer>) -> Self {
        Self { config, muxer }
    }

    async fn capture_in(
        &self,
        session: &BrowserSession,
        url: &str,
    ) -> Result<Option<MediaRecord>, ResolveError> {
        let browser_err = |e: chromiumoxide::error::CdpError| ResolveError::Browser(e.to_string());

        let page = session.browser()?.new_page("about:blank").await.map_err(browser_err)?;
        page.set_user_agent(self.config.user_agent.as_str())
            .await
            .map_err(browser_err)?;

        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err)?;

        let captured = Arc::new(Mutex::new(CapturedStreams::default()));
        let collector = {
            let captured = captured.clone();
            let markers = self.config.markers.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let mut streams = captured.lock().unwrap_or_else(|p| p.into_inner());
                    streams.observe(&event.response.url, &event.response.mime_type, &markers);
                }
            })
        };

        if let Err(e) = page.execute(SetLifecycleEventsEnabledParams::new(true)).await {
            tracing::debug!(error = %e, "could not enable lifecycle events");
        }
        let lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(browser_err)?;

        let navigation = async {
            page.goto(url).await?;
            if !wait_for_network_idle(lifecycle.map(|event| event.name.clone())).await {
                tracing::debug!(url, "lifecycle stream ended before network idle");
            }
            Ok::<(), chromiumoxide::error::CdpError>(())
        };

        match tokio::time::timeout(self.config.navigation_timeout, navigation).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                collector.abort();
                return Err(ResolveError::Browser(format!("Navigation failed: {}", e)));
            }
            Err(_) => {
                collector.abort();
                return Err(ResolveError::Timeout(format!(
                    "browser navigation exceeded {}s",
                    self.config.navigation_timeout.as_secs()
                )));
            }
        }

        tokio::time::sleep(self.config.settle).await;

        let scan = match page.evaluate(PAGE_SCAN_SCRIPT).await {
            Ok(result) => result.into_value::<PageScan>().unwrap_or_default(),
            Err(e) => {
                tracing::debug!(error = %e, "page scan failed");
                PageScan::default()
            }
        };

        collector.abort();
        let streams = std::mem::take(&mut *captured.lock().unwrap_or_else(|p| p.into_inner()));

        tracing::debug!(
            videos = streams.videos.len(),
            audios = streams.audios.len(),
            has_thumbnail = streams.thumbnail.is_some(),
            "browser capture finished"
        );

        self.assemble(url, streams, scan).await
    }

    /// Turn captured streams into a record, merging audio in when it arrived separately
    async fn assemble(
        &self,
        url: &str,
        streams: CapturedStreams,
        scan: PageScan,
    ) -> Result<Option<MediaRecord>, ResolveError> {
        let Some(video) =
            QualitySelector::select_best_video(&streams.videos, &self.config.video_quality_tokens)
        else {
            tracing::info!(url, "no video stream captured");
            return Ok(None);
        };

        let media_url = match streams.audios.first() {
            None => video.to_string(),
            Some(audio) => match self.muxer.merge(url, video, audio).await {
                Ok(merged) => merged.public_url,
                Err(e) => {
                    tracing::warn!(url, error = %e, "merge failed, returning video-only stream");
                    video.to_string()
                }
            },
        };

        Ok(Some(
            MediaRecord::video(media_url)
                .with_thumbnail(streams.thumbnail)
                .with_caption(scan.caption.as_deref().map(normalize_text))
                .with_author(scan.author),
        ))
    }
}

#[async_trait]
impl BrowserFallback for ChromeFallback {
    async fn capture(&self, url: &str) -> Result<Option<MediaRecord>, ResolveError> {
        tracing::info!(url, "starting browser fallback");
        let session = BrowserSession::launch(&self.config).await?;
        let result = self.capture_in(&session, url).await;
        session.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::errors::MuxError;
    use crate::resolver::models::MediaType;
    use crate::resolver::muxer::{MuxerConfig, StreamDownloader};
    use std::path::Path;

    struct WritingDownloader;

    #[async_trait]
    impl StreamDownloader for WritingDownloader {
        async fn download(&self, url: &str, dest: &Path) -> Result<(), MuxError> {
            tokio::fs::write(dest, url.as_bytes()).await?;
            Ok(())
        }
    }

    fn fallback(dir: &Path) -> ChromeFallback {
        let muxer = MediaMuxer::new(
            MuxerConfig {
                cache_dir: dir.to_path_buf(),
                public_base_url: "http://localhost:3000".to_string(),
                ffmpeg_path: "definitely-not-ffmpeg-xyz".to_string(),
                remux_timeout_secs: 5,
            },
            Arc::new(WritingDownloader),
        );
        ChromeFallback::new(BrowserConfig::default(), Arc::new(muxer))
    }

    #[test]
    fn test_classify_by_marker_and_mime() {
        let m = StreamMarkers::default();
        assert_eq!(
            classify_response("https://scontent.cdninstagram.com/v/t50/x_a.mp4?bytestart=0", "", &m),
            Some(StreamKind::Audio)
        );
        assert_eq!(
            classify_response("https://scontent.cdninstagram.com/v/t50/720p.mp4", "", &m),
            Some(StreamKind::Video)
        );
        assert_eq!(
            classify_response("https://scontent.fbcdn.net/o1/seg", "audio/mp4", &m),
            Some(StreamKind::Audio)
        );
        assert_eq!(
            classify_response("https://scontent.cdninstagram.com/v/t51/thumb.jpg", "image/jpeg", &m),
            Some(StreamKind::Thumbnail)
        );
        assert_eq!(classify_response("https://www.instagram.com/static/app.js", "", &m), None);
    }

    #[test]
    fn test_url_markers_win_over_mime() {
        let m = StreamMarkers::default();
        assert_eq!(
            classify_response("https://scontent.cdninstagram.com/v/t50/720p.mp4", "audio/mp4", &m),
            Some(StreamKind::Video)
        );
        assert_eq!(
            classify_response("https://scontent.cdninstagram.com/v/t51/thumb.jpg", "video/mp4", &m),
            Some(StreamKind::Thumbnail)
        );
    }

    #[tokio::test]
    async fn test_network_idle_after_navigation_init() {
        let names = |v: &[&str]| futures::stream::iter(v.iter().map(|s| s.to_string()).collect::<Vec<_>>());

        // Idle of the blank start page does not count
        assert!(!wait_for_network_idle(names(&["networkIdle", "init", "load"])).await);
        assert!(wait_for_network_idle(names(&["networkIdle", "init", "load", "networkIdle"])).await);
        assert!(!wait_for_network_idle(names(&[])).await);
    }

    #[test]
    fn test_strip_byte_range() {
        assert_eq!(
            strip_byte_range("https://cdn/v.mp4?efg=abc&bytestart=0&byteend=999&oh=1"),
            "https://cdn/v.mp4?efg=abc&oh=1"
        );
        assert_eq!(strip_byte_range("https://cdn/v.mp4?bytestart=0&byteend=9"), "https://cdn/v.mp4");
        assert_eq!(strip_byte_range("https://cdn/v.mp4"), "https://cdn/v.mp4");
    }

    #[test]
    fn test_observe_dedups_in_discovery_order() {
        let m = StreamMarkers::default();
        let mut s = CapturedStreams::default();
        s.observe("https://a.cdninstagram.com/t.jpg", "image/jpeg", &m);
        s.observe("https://a.cdninstagram.com/480p.mp4?bytestart=0&byteend=10", "video/mp4", &m);
        s.observe("https://a.cdninstagram.com/480p.mp4?bytestart=11&byteend=20", "video/mp4", &m);
        s.observe("https://a.cdninstagram.com/720p.mp4", "video/mp4", &m);
        s.observe("https://a.cdninstagram.com/other.jpg", "image/jpeg", &m);

        assert_eq!(
            s.videos,
            vec![
                "https://a.cdninstagram.com/480p.mp4",
                "https://a.cdninstagram.com/720p.mp4"
            ]
        );
        assert_eq!(s.thumbnail.as_deref(), Some("https://a.cdninstagram.com/t.jpg"));
    }

    #[tokio::test]
    async fn test_assemble_without_video_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fb = fallback(dir.path());
        let out = fb
            .assemble("https://www.instagram.com/reel/x/", CapturedStreams::default(), PageScan::default())
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_assemble_video_only_picks_best_quality() {
        let dir = tempfile::tempdir().unwrap();
        let fb = fallback(dir.path());
        let streams = CapturedStreams {
            videos: vec!["https://cdn/360p.mp4".into(), "https://cdn/720p.mp4".into()],
            audios: vec![],
            thumbnail: Some("https://cdn/t.jpg".into()),
        };
        let scan = PageScan {
            caption: Some("  hi &amp; bye ".into()),
            author: Some("jane".into()),
        };

        let rec = fb
            .assemble("https://www.instagram.com/reel/x/", streams, scan)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.media_type, MediaType::Video);
        assert_eq!(rec.media_url, "https://cdn/720p.mp4");
        assert_eq!(rec.thumbnail_url.as_deref(), Some("https://cdn/t.jpg"));
        assert_eq!(rec.caption, "hi & bye");
        assert_eq!(rec.author, "jane");
    }

    #[tokio::test]
    async fn test_merge_failure_degrades_to_video_only() {
        let dir = tempfile::tempdir().unwrap();
        let fb = fallback(dir.path());
        let streams = CapturedStreams {
            videos: vec!["https://cdn/720p.mp4".into()],
            audios: vec!["https://cdn/x_a.mp4".into()],
            thumbnail: None,
        };

        let rec = fb
            .assemble("https://www.instagram.com/reel/x/", streams, PageScan::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.media_url, "https://cdn/720p.mp4");
        assert_eq!(rec.author, "unknown");
    }
}
