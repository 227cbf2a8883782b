// Media muxer - merges separately delivered video and audio streams
//
// Outputs are content-addressed by the *post* URL (stream URLs carry
// per-session signatures and change run to run), so a second request for the
// same post is served straight from the cache directory.

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::errors::MuxError;
use super::models::{MergeJob, MergeState, MergedMedia};
use super::utils::run_output_with_timeout;

/// URL path under which merged files are served
pub const MERGED_ROUTE: &str = "/merged";

/// Subdirectory of the cache holding downloads and in-progress outputs
const TEMP_SUBDIR: &str = "tmp";

/// Length of the hex cache key that names a merged file
const CACHE_KEY_LEN: usize = 32;

/// Fetches one remote stream to a local file
#[async_trait]
pub trait StreamDownloader: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), MuxError>;
}

/// Streams the response body straight to disk
pub struct HttpStreamDownloader {
    client: reqwest::Client,
}

impl HttpStreamDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamDownloader for HttpStreamDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), MuxError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| MuxError::Download(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0usize;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| MuxError::Download(e.to_string()))?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if written == 0 {
            return Err(MuxError::Download(format!("empty stream from {}", url)));
        }

        tracing::debug!(bytes = written, dest = %dest.display(), "stream downloaded");
        Ok(())
    }
}

/// Muxer settings, injected at construction
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    /// Shared cache / temp directory for inputs and merged outputs
    pub cache_dir: PathBuf,
    /// Externally reachable base URL the merged files are served from
    pub public_base_url: String,
    pub ffmpeg_path: String,
    pub remux_timeout_secs: u64,
}

pub struct MediaMuxer {
    config: MuxerConfig,
    downloader: Arc<dyn StreamDownloader>,
    /// Per-key locks so concurrent requests for one post merge only once
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Deterministic cache key for a post URL
pub fn cache_key(post_url: &str) -> String {
    let digest = Sha256::digest(post_url.trim().as_bytes());
    hex::encode(digest)[..CACHE_KEY_LEN].to_string()
}

/// Whether `name` is a finished merge output (`<cache key>.mp4`)
pub fn is_merged_file_name(name: &str) -> bool {
    name.strip_suffix(".mp4").is_some_and(|key| {
        key.len() == CACHE_KEY_LEN && key.bytes().all(|b| b.is_ascii_hexdigit())
    })
}

impl MediaMuxer {
    pub fn new(config: MuxerConfig, downloader: Arc<dyn StreamDownloader>) -> Self {
        Self {
            config,
            downloader,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn temp_dir(&self) -> PathBuf {
        self.config.cache_dir.join(TEMP_SUBDIR)
    }

    pub fn output_path(&self, key: &str) -> PathBuf {
        self.config.cache_dir.join(format!("{}.mp4", key))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}{}/{}.mp4",
            self.config.public_base_url.trim_end_matches('/'),
            MERGED_ROUTE,
            key
        )
    }

    fn new_job(&self, key: &str) -> MergeJob {
        let tmp = self.temp_dir();
        MergeJob {
            cache_key: key.to_string(),
            video_path: tmp.join(format!("{}_video.mp4", key)),
            audio_path: tmp.join(format!("{}_audio.m4a", key)),
            output_path: self.output_path(key),
            state: MergeState::NotStarted,
        }
    }

    /// Merge the two streams for `post_url`, or return the cached result.
    pub async fn merge(
        &self,
        post_url: &str,
        video_url: &str,
        audio_url: &str,
    ) -> Result<MergedMedia, MuxError> {
        let key = cache_key(post_url);
        let lock = self.key_lock(&key);

        let result = {
            let _guard = lock.lock().await;
            self.merge_locked(&key, video_url, audio_url).await
        };

        self.release_key(&key, lock);
        result
    }

    async fn merge_locked(
        &self,
        key: &str,
        video_url: &str,
        audio_url: &str,
    ) -> Result<MergedMedia, MuxError> {
        let mut job = self.new_job(key);

        if is_cached(&job.output_path).await {
            tracing::info!(key, "merged output served from cache");
            job.advance(MergeState::Done);
            return Ok(self.merged(&job));
        }

        tokio::fs::create_dir_all(self.temp_dir()).await?;
        let part_path = self.temp_dir().join(format!("{}.part.mp4", key));

        match self.run_job(&mut job, &part_path, video_url, audio_url).await {
            Ok(()) => {
                remove_if_exists(&job.video_path).await;
                remove_if_exists(&job.audio_path).await;
                job.advance(MergeState::Done);
                tracing::info!(key, output = %job.output_path.display(), "streams merged");
                Ok(self.merged(&job))
            }
            Err(e) => {
                job.advance(MergeState::Failed);
                for path in [&job.video_path, &job.audio_path, &part_path, &job.output_path] {
                    remove_if_exists(path).await;
                }
                tracing::warn!(key, error = %e, "merge failed, temporary files removed");
                Err(e)
            }
        }
    }

    async fn run_job(
        &self,
        job: &mut MergeJob,
        part_path: &Path,
        video_url: &str,
        audio_url: &str,
    ) -> Result<(), MuxError> {
        job.advance(MergeState::Downloading);
        self.downloader.download(video_url, &job.video_path).await?;
        self.downloader.download(audio_url, &job.audio_path).await?;

        job.advance(MergeState::Merging);
        self.remux(&job.video_path, &job.audio_path, part_path).await?;

        tokio::fs::rename(part_path, &job.output_path).await?;
        Ok(())
    }

    /// Copy the video stream as-is and transcode audio to AAC
    async fn remux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), MuxError> {
        let args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            video.to_string_lossy().into_owned(),
            "-i".into(),
            audio.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().into_owned(),
        ];

        let out = run_output_with_timeout(&self.config.ffmpeg_path, args, self.config.remux_timeout_secs)
            .await
            .map_err(MuxError::Remux)?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(MuxError::Remux(format!(
                "ffmpeg exited with {:?}: {}",
                out.status.code(),
                tail
            )));
        }

        Ok(())
    }

    fn merged(&self, job: &MergeJob) -> MergedMedia {
        MergedMedia {
            path: job.output_path.clone(),
            public_url: self.public_url(&job.cache_key),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key.to_string()).or_default().clone()
    }

    fn release_key(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        // Map entry plus ours: nobody else is waiting on this key
        if Arc::strong_count(&lock) <= 2 {
            map.remove(key);
        }
    }

    /// Remove merged outputs and stray temporaries older than `max_age`.
    /// Returns how many files were deleted.
    pub async fn purge_older_than(&self, max_age: Duration) -> std::io::Result<usize> {
        let removed = purge_dir(&self.config.cache_dir, max_age).await?
            + purge_dir(&self.temp_dir(), max_age).await?;

        tracing::info!(removed, cache_dir = %self.config.cache_dir.display(), "purged merged-file cache");
        Ok(removed)
    }
}

async fn purge_dir(dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let age = meta.modified()?.elapsed().unwrap_or_default();
        if age >= max_age {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

async fn is_cached(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a small file per download and counts calls; optionally fails on the nth call
    struct FakeDownloader {
        calls: AtomicUsize,
        fail_on_call: Option<usize>,
    }

    impl FakeDownloader {
        fn new(fail_on_call: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on_call,
            }
        }
    }

    #[async_trait]
    impl StreamDownloader for FakeDownloader {
        async fn download(&self, url: &str, dest: &Path) -> Result<(), MuxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::fs::write(dest, url.as_bytes()).await?;
            if self.fail_on_call == Some(n) {
                return Err(MuxError::Download(format!("boom on {}", url)));
            }
            Ok(())
        }
    }

    fn muxer(dir: &Path, downloader: Arc<FakeDownloader>, ffmpeg: &str) -> MediaMuxer {
        MediaMuxer::new(
            MuxerConfig {
                cache_dir: dir.to_path_buf(),
                public_base_url: "https://media.example/".to_string(),
                ffmpeg_path: ffmpeg.to_string(),
                remux_timeout_secs: 5,
            },
            downloader,
        )
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key("https://www.instagram.com/reel/abc/");
        assert_eq!(a, cache_key("https://www.instagram.com/reel/abc/"));
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, cache_key("https://www.instagram.com/reel/abd/"));
    }

    #[tokio::test]
    async fn test_cached_output_skips_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(None));
        let m = muxer(dir.path(), downloader.clone(), "ffmpeg");

        let post = "https://www.instagram.com/reel/cached/";
        let key = cache_key(post);
        std::fs::write(m.output_path(&key), b"already merged").unwrap();

        let merged = m
            .merge(post, "https://cdn/v.mp4", "https://cdn/a.mp4")
            .await
            .unwrap();

        assert_eq!(merged.path, m.output_path(&key));
        assert_eq!(merged.public_url, format!("https://media.example/merged/{}.mp4", key));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_download_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(Some(2)));
        let m = muxer(dir.path(), downloader.clone(), "ffmpeg");

        let err = m
            .merge("https://www.instagram.com/reel/x/", "https://cdn/v.mp4", "https://cdn/a.mp4")
            .await
            .unwrap_err();

        assert!(matches!(err, MuxError::Download(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
        assert!(files_in(dir.path()).is_empty());
        assert!(files_in(&dir.path().join(TEMP_SUBDIR)).is_empty());
    }

    #[tokio::test]
    async fn test_remux_failure_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(FakeDownloader::new(None));
        let m = muxer(dir.path(), downloader, "definitely-not-ffmpeg-xyz");

        let err = m
            .merge("https://www.instagram.com/reel/y/", "https://cdn/v.mp4", "https://cdn/a.mp4")
            .await
            .unwrap_err();

        assert!(matches!(err, MuxError::Remux(_)));
        assert!(files_in(dir.path()).is_empty());
        assert!(files_in(&dir.path().join(TEMP_SUBDIR)).is_empty());
        assert!(m.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_removes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let m = muxer(dir.path(), Arc::new(FakeDownloader::new(None)), "ffmpeg");
        std::fs::write(dir.path().join("old.mp4"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join(TEMP_SUBDIR)).unwrap();
        std::fs::write(dir.path().join(TEMP_SUBDIR).join("k_video.mp4"), b"x").unwrap();

        assert_eq!(m.purge_older_than(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(m.purge_older_than(Duration::ZERO).await.unwrap(), 2);
        assert!(files_in(dir.path()).is_empty());
        assert!(files_in(&dir.path().join(TEMP_SUBDIR)).is_empty());
    }

    /// Records where the inputs were written, then fails
    struct RecordingDownloader(Mutex<Vec<PathBuf>>);

    #[async_trait]
    impl StreamDownloader for RecordingDownloader {
        async fn download(&self, _url: &str, dest: &Path) -> Result<(), MuxError> {
            self.0.lock().unwrap().push(dest.to_path_buf());
            Err(MuxError::Download("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_inputs_stay_out_of_served_directory() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Arc::new(RecordingDownloader(Mutex::new(Vec::new())));
        let m = MediaMuxer::new(
            MuxerConfig {
                cache_dir: dir.path().to_path_buf(),
                public_base_url: "https://media.example".to_string(),
                ffmpeg_path: "ffmpeg".to_string(),
                remux_timeout_secs: 5,
            },
            downloader.clone(),
        );

        let _ = m
            .merge("https://www.instagram.com/reel/z/", "https://cdn/v.mp4", "https://cdn/a.mp4")
            .await;

        let written = downloader.0.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].parent(), Some(dir.path().join(TEMP_SUBDIR).as_path()));
        let name = written[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(!is_merged_file_name(&name));
    }

    #[test]
    fn test_merged_file_names() {
        let key = cache_key("https://www.instagram.com/reel/abc/");
        assert!(is_merged_file_name(&format!("{}.mp4", key)));
        assert!(!is_merged_file_name(&format!("{}_video.mp4", key)));
        assert!(!is_merged_file_name(&format!("{}.part.mp4", key)));
        assert!(!is_merged_file_name(&format!("{}_audio.m4a", key)));
        assert!(!is_merged_file_name("abc.mp4"));
        assert!(!is_merged_file_name(&format!("tmp/{}.mp4", key)));
    }
}
