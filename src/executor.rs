//! Job execution: one manifest, every item, bounded retries
//!
//! The executor resolves the option set for each download item, invokes the
//! fetcher (and optionally the muxer) for it through [`run_with_retry`], and
//! folds the per-item outcomes into a [`JobResult`]. Every item is attempted
//! even after an earlier one failed; only a shutdown request stops the walk.

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error};
use crate::fetcher::{FetchRequest, MediaFetcher};
use crate::manifest::{DownloadItem, DownloadMode, Manifest};
use crate::options::{DownloadOptions, OverlayMode};
use crate::process::WorkDirSnapshot;
use crate::retry::{RetryOutcome, run_with_retry};
use crate::transcode::{MuxRequest, Muxer};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Format selector preferring the best video stream muxed with the best audio
pub const VIDEO_FORMAT: &str = "bv*+ba/b";
/// Format selector preferring the best audio-only stream
pub const AUDIO_FORMAT: &str = "ba*/b";
/// Subtitle format preference order
pub const SUBTITLE_FORMATS: &str = "vtt/srt/best";

/// Extensions of in-progress downloader files, never muxed
const TEMPORARY_EXTENSIONS: &[&str] = &["part", "ytdl", "temp"];

/// How one download item ended
#[derive(Debug)]
pub enum ItemStatus {
    /// The item was fetched (and muxed, if requested)
    Succeeded,
    /// The item failed; siblings were still attempted
    Failed(Error),
    /// A shutdown request interrupted the item
    Cancelled,
}

/// Outcome of one download item
#[derive(Debug)]
pub struct ItemOutcome {
    /// Zero-based position in the manifest
    pub index: usize,
    /// URLs of the item
    pub urls: Vec<String>,
    /// Attempts made
    pub attempts: u32,
    /// Final status
    pub status: ItemStatus,
}

impl ItemOutcome {
    /// Whether the item succeeded
    pub fn succeeded(&self) -> bool {
        matches!(self.status, ItemStatus::Succeeded)
    }
}

/// Aggregated outcome of a manifest
#[must_use]
#[derive(Debug)]
pub struct JobResult {
    /// True only when every item succeeded and nothing was cancelled
    pub success: bool,
    /// True when a shutdown request interrupted the job
    pub cancelled: bool,
    /// Outcomes of the items that were reached, in manifest order
    pub items: Vec<ItemOutcome>,
}

impl JobResult {
    /// Number of failed items
    pub fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed(_)))
            .count()
    }
}

/// Runs manifests against the download collaborator
pub struct JobExecutor {
    fetcher: Arc<dyn MediaFetcher>,
    muxer: Option<Arc<dyn Muxer>>,
    retry: RetryConfig,
    overlay_mode: OverlayMode,
    cookie_file: PathBuf,
}

impl JobExecutor {
    /// Create an executor without a muxer
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        retry: RetryConfig,
        overlay_mode: OverlayMode,
        cookie_file: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            muxer: None,
            retry,
            overlay_mode,
            cookie_file,
        }
    }

    /// Attach the muxer used by manifests that request `remux`
    pub fn with_muxer(mut self, muxer: Arc<dyn Muxer>) -> Self {
        self.muxer = Some(muxer);
        self
    }

    /// Directory a manifest's media lands in: `<landing>/<manifest name>`
    pub fn work_dir(landing_dir: &Path, manifest_name: &str) -> PathBuf {
        landing_dir.join(manifest_name)
    }

    /// Options every job starts from
    pub fn base_options(landing_dir: &Path, manifest_name: &str) -> DownloadOptions {
        let template = Self::work_dir(landing_dir, manifest_name).join("%(title)s.%(ext)s");

        let mut options = DownloadOptions::new();
        options.insert("verbose", true);
        options.insert("outtmpl", template.to_string_lossy().to_string());
        options.insert("ignoreerrors", false);
        options
    }

    /// Overlay the manifest's mode-specific and global settings onto `base`
    pub fn effective_options(&self, manifest: &Manifest, base: &DownloadOptions) -> DownloadOptions {
        let mut options = base.clone();

        match manifest.mode {
            DownloadMode::Video => {
                options.insert("format", VIDEO_FORMAT);
                if manifest.subtitles {
                    options.insert("subtitlesformat", SUBTITLE_FORMATS);
                    options.insert("writesubtitles", true);
                    options.insert("writeautomaticsub", true);
                }
            }
            DownloadMode::Audio => {
                options.insert("format", AUDIO_FORMAT);
                options.insert(
                    "postprocessors",
                    json!([{ "key": "FFmpegExtractAudio", "preferredquality": 0 }]),
                );
            }
        }

        if let Some(rate) = &manifest.rate_limit {
            options.insert("ratelimit", rate.as_str());
        }
        if manifest.use_cookies {
            options.insert("cookiefile", self.cookie_file.to_string_lossy().to_string());
        }

        options
    }

    /// Resolve one item's options from the job's effective set
    ///
    /// The manifest rate limit is re-applied after the overlays, so an item
    /// can neither drop nor change it.
    pub fn item_options(
        &self,
        manifest: &Manifest,
        effective: &DownloadOptions,
        item: &DownloadItem,
    ) -> DownloadOptions {
        let Some(overlays) = &item.override_opts else {
            return effective.clone();
        };

        let mut options = effective.with_overlays(overlays, self.overlay_mode);
        if let Some(rate) = &manifest.rate_limit {
            options.insert("ratelimit", rate.as_str());
        }
        options
    }

    fn remux_container<'a>(&self, manifest: &'a Manifest) -> Option<&'a str> {
        match (manifest.mode, manifest.remux.as_deref()) {
            (DownloadMode::Video, Some(container)) => Some(container),
            (DownloadMode::Audio, Some(container)) => {
                tracing::warn!(container = container, "remux is ignored for audio manifests");
                None
            }
            (_, None) => None,
        }
    }

    /// Run every item of `manifest`
    pub async fn execute(
        &self,
        manifest: &Manifest,
        base: &DownloadOptions,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> JobResult {
        let effective = self.effective_options(manifest, base);
        let remux = self.remux_container(manifest);
        let mut items = Vec::with_capacity(manifest.items.len());
        let mut cancelled = false;

        for (index, item) in manifest.items.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let request = FetchRequest {
                urls: item.urls.clone(),
                options: self.item_options(manifest, &effective, item),
                work_dir: work_dir.to_path_buf(),
            };

            // Taken once per item so a retry after a failed mux still sees
            // the media an earlier attempt downloaded.
            let snapshot = match remux {
                Some(_) => match WorkDirSnapshot::capture(work_dir).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        let error = Error::from(e);
                        tracing::error!(item = index, error = %error, "failed to inspect work directory");
                        items.push(ItemOutcome {
                            index,
                            urls: item.urls.clone(),
                            attempts: 0,
                            status: ItemStatus::Failed(error),
                        });
                        continue;
                    }
                },
                None => None,
            };

            let outcome = run_with_retry(&self.retry, cancel, |attempt| {
                let request = &request;
                let snapshot = snapshot.as_ref();
                async move {
                    tracing::debug!(
                        item = index,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        fetcher = self.fetcher.name(),
                        "attempting download item"
                    );
                    self.attempt(request, remux.zip(snapshot), cancel).await
                }
            })
            .await;

            let attempts = outcome.attempts();
            let status = match outcome {
                RetryOutcome::Succeeded { .. } => {
                    tracing::info!(item = index, attempts = attempts, "download item succeeded");
                    ItemStatus::Succeeded
                }
                RetryOutcome::Exhausted { error, attempts } => {
                    let error = Error::Download(DownloadError::AttemptsExhausted {
                        urls: item.urls.clone(),
                        attempts,
                        last_error: error.to_string(),
                    });
                    tracing::error!(item = index, error = %error, "download item failed");
                    ItemStatus::Failed(error)
                }
                RetryOutcome::Aborted { error, .. } if error.is_cancelled() => ItemStatus::Cancelled,
                RetryOutcome::Aborted { error, .. } => {
                    tracing::error!(
                        item = index,
                        error = %error,
                        error_code = error.error_code(),
                        "download item failed with terminal error"
                    );
                    ItemStatus::Failed(error)
                }
                RetryOutcome::Cancelled { .. } => ItemStatus::Cancelled,
            };

            let interrupted = matches!(status, ItemStatus::Cancelled);
            items.push(ItemOutcome {
                index,
                urls: item.urls.clone(),
                attempts,
                status,
            });
            if interrupted {
                cancelled = true;
                break;
            }
        }

        let success = !cancelled
            && items.len() == manifest.items.len()
            && items.iter().all(ItemOutcome::succeeded);

        JobResult {
            success,
            cancelled,
            items,
        }
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        remux: Option<(&str, &WorkDirSnapshot)>,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        let Some((container, snapshot)) = remux else {
            return self.fetcher.fetch(request, cancel).await;
        };

        let muxer = self.muxer.as_ref().ok_or_else(|| DownloadError::ToolNotFound {
            tool: "ffmpeg".to_string(),
        })?;

        self.fetcher.fetch(request, cancel).await?;

        let inputs: Vec<PathBuf> = snapshot
            .new_files()
            .await?
            .into_iter()
            .filter(|p| !is_temporary(p))
            .collect();
        if inputs.is_empty() {
            tracing::debug!(work_dir = %request.work_dir.display(), "no new files to remux");
            return Ok(());
        }

        let mux = MuxRequest {
            inputs,
            work_dir: request.work_dir.clone(),
            container: container.to_string(),
        };
        muxer.mux(&mux, cancel).await.map(|_| ())
    }
}

fn is_temporary(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TEMPORARY_EXTENSIONS.contains(&ext))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_str;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails every request containing one of `failing` URLs
    #[derive(Default)]
    struct ScriptedFetcher {
        failing: HashSet<String>,
        calls: Mutex<Vec<FetchRequest>>,
        produce: Option<&'static str>,
        /// Leave an already downloaded `produce` file alone, like yt-dlp does
        skip_existing: bool,
    }

    impl ScriptedFetcher {
        fn failing(urls: &[&str]) -> Self {
            Self {
                failing: urls.iter().map(|u| u.to_string()).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<FetchRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest, _cancel: &CancellationToken) -> crate::Result<()> {
            self.calls.lock().unwrap().push(request.clone());
            if request.urls.iter().any(|u| self.failing.contains(u)) {
                return Err(DownloadError::ToolFailed {
                    tool: "yt-dlp".into(),
                    exit_code: Some(1),
                    message: "HTTP Error 404".into(),
                }
                .into());
            }
            if let Some(name) = self.produce {
                let target = request.work_dir.join(name);
                if self.skip_existing && tokio::fs::try_exists(&target).await? {
                    return Ok(());
                }
                tokio::fs::create_dir_all(&request.work_dir).await?;
                tokio::fs::write(target, b"media").await?;
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Records requests and fails the first `failures` of them
    #[derive(Default)]
    struct RecordingMuxer {
        requests: Mutex<Vec<MuxRequest>>,
        failures: usize,
    }

    impl RecordingMuxer {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn requests(&self) -> Vec<MuxRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Muxer for RecordingMuxer {
        async fn mux(&self, request: &MuxRequest, _cancel: &CancellationToken) -> crate::Result<PathBuf> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            if call <= self.failures {
                return Err(DownloadError::ToolFailed {
                    tool: "ffmpeg".into(),
                    exit_code: Some(1),
                    message: "Invalid data found when processing input".into(),
                }
                .into());
            }
            Ok(request.output_path())
        }
    }

    fn retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::ZERO,
            ..RetryConfig::default()
        }
    }

    fn executor(fetcher: Arc<ScriptedFetcher>) -> JobExecutor {
        JobExecutor::new(
            fetcher,
            retry(2),
            OverlayMode::Positional,
            PathBuf::from("/dl/cookies.txt"),
        )
    }

    fn base() -> DownloadOptions {
        JobExecutor::base_options(Path::new("/landing"), "job.yaml")
    }

    #[test]
    fn base_options_point_into_per_manifest_dir() {
        let opts = base();
        assert_eq!(opts.get("verbose"), Some(&json!(true)));
        assert_eq!(
            opts.get_str("outtmpl"),
            Some("/landing/job.yaml/%(title)s.%(ext)s")
        );
        assert_eq!(opts.get("ignoreerrors"), Some(&json!(false)));
    }

    #[test]
    fn video_with_subtitles_rate_limit_and_cookies() {
        let manifest = parse_str(
            "config: {type: video, subtitles: true, rate_limit: 2M, cookies: true}\nitems:\n  - urls: [\"https://v/1\"]\n",
        )
        .unwrap();
        let exec = executor(Arc::new(ScriptedFetcher::default()));
        let opts = exec.effective_options(&manifest, &base());

        assert_eq!(opts.get_str("format"), Some(VIDEO_FORMAT));
        assert_eq!(opts.get_str("subtitlesformat"), Some("vtt/srt/best"));
        assert_eq!(opts.get("writesubtitles"), Some(&json!(true)));
        assert_eq!(opts.get("writeautomaticsub"), Some(&json!(true)));
        assert_eq!(opts.get_str("ratelimit"), Some("2M"));
        assert_eq!(opts.get_str("cookiefile"), Some("/dl/cookies.txt"));
    }

    #[test]
    fn audio_extracts_at_best_quality_and_ignores_subtitles() {
        let manifest =
            parse_str("config: {type: AUDIO, subtitles: true}\nitems:\n  - urls: [\"https://a/1\"]\n")
                .unwrap();
        let exec = executor(Arc::new(ScriptedFetcher::default()));
        let opts = exec.effective_options(&manifest, &base());

        assert_eq!(opts.get_str("format"), Some(AUDIO_FORMAT));
        assert_eq!(
            opts.get("postprocessors"),
            Some(&json!([{ "key": "FFmpegExtractAudio", "preferredquality": 0 }]))
        );
        assert!(!opts.contains_key("writesubtitles"));
        assert!(!opts.contains_key("cookiefile"));
    }

    #[test]
    fn item_overlays_cannot_drop_the_rate_limit() {
        let manifest = parse_str(
            "config: {type: video, rate_limit: 1M}\nitems:\n  - urls: [\"https://v/1\"]\n    opts:\n      - format: worst\n",
        )
        .unwrap();
        let exec = executor(Arc::new(ScriptedFetcher::default()));
        let effective = exec.effective_options(&manifest, &base());
        let opts = exec.item_options(&manifest, &effective, &manifest.items[0]);

        // One overlay keeps only the first base entry, then the rate limit returns.
        assert_eq!(opts.len(), 3);
        assert_eq!(opts.get_str("format"), Some("worst"));
        assert_eq!(opts.get_str("ratelimit"), Some("1M"));
        assert!(opts.contains_key("verbose"));
    }

    #[tokio::test]
    async fn partial_failure_attempts_every_item() {
        let manifest = parse_str(
            "config: {type: video}\nitems:\n  - urls: [\"https://v/ok1\"]\n  - urls: [\"https://v/bad\"]\n  - urls: [\"https://v/ok2\"]\n",
        )
        .unwrap();
        let fetcher = Arc::new(ScriptedFetcher::failing(&["https://v/bad"]));
        let exec = executor(fetcher.clone());

        let result = exec
            .execute(&manifest, &base(), Path::new("/landing/job.yaml"), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(!result.cancelled);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.failed_items(), 1);
        assert_eq!(result.items[1].attempts, 2);

        let called: Vec<String> = fetcher.calls().iter().map(|r| r.urls[0].clone()).collect();
        assert_eq!(
            called,
            vec!["https://v/ok1", "https://v/bad", "https://v/bad", "https://v/ok2"]
        );
        match &result.items[1].status {
            ItemStatus::Failed(e) => assert_eq!(e.error_code(), "attempts_exhausted"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_items_succeeding_is_success() {
        let manifest = parse_str(
            "config: {type: audio}\nitems:\n  - urls: [\"https://a/1\", \"https://a/2\"]\n  - urls: [\"https://a/3\"]\n",
        )
        .unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let result = executor(fetcher.clone())
            .execute(&manifest, &base(), Path::new("/landing/job.yaml"), &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(fetcher.calls().len(), 2);
        assert_eq!(fetcher.calls()[0].urls, vec!["https://a/1", "https://a/2"]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_first_item() {
        let manifest = parse_str("config: {type: video}\nitems:\n  - urls: [\"https://v/1\"]\n").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = executor(fetcher.clone())
            .execute(&manifest, &base(), Path::new("/landing/job.yaml"), &cancel)
            .await;

        assert!(result.cancelled);
        assert!(!result.success);
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn remux_without_muxer_fails_terminally() {
        let dir = TempDir::new().unwrap();
        let manifest =
            parse_str("config: {type: video, remux: mkv}\nitems:\n  - urls: [\"https://v/1\"]\n").unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());

        let result = executor(fetcher.clone())
            .execute(&manifest, &base(), dir.path(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.items[0].attempts, 1, "missing ffmpeg is not retried");
        assert!(fetcher.calls().is_empty(), "nothing is downloaded without a muxer");
    }

    fn remux_fixture() -> (TempDir, Manifest, Arc<ScriptedFetcher>) {
        let dir = TempDir::new().unwrap();
        let manifest =
            parse_str("config: {type: video, remux: mkv}\nitems:\n  - urls: [\"https://v/1\"]\n").unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            produce: Some("Clip.webm"),
            skip_existing: true,
            ..ScriptedFetcher::default()
        });
        (dir, manifest, fetcher)
    }

    #[tokio::test]
    async fn retry_after_failed_mux_muxes_the_earlier_download() {
        let (dir, manifest, fetcher) = remux_fixture();
        let muxer = Arc::new(RecordingMuxer::failing(1));

        let result = executor(fetcher.clone())
            .with_muxer(muxer.clone())
            .execute(&manifest, &base(), dir.path(), &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.items[0].attempts, 2);
        assert_eq!(fetcher.calls().len(), 2);
        let requests = muxer.requests();
        assert_eq!(requests.len(), 2, "the second attempt muxes again");
        assert_eq!(requests[1].inputs, vec![dir.path().join("Clip.webm")]);
    }

    #[tokio::test]
    async fn mux_failing_every_attempt_fails_the_item() {
        let (dir, manifest, fetcher) = remux_fixture();
        let muxer = Arc::new(RecordingMuxer::failing(usize::MAX));

        let result = executor(fetcher)
            .with_muxer(muxer.clone())
            .execute(&manifest, &base(), dir.path(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_items(), 1);
        assert_eq!(muxer.requests().len(), 2);
        match &result.items[0].status {
            ItemStatus::Failed(e) => assert_eq!(e.error_code(), "attempts_exhausted"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remux_receives_only_files_the_item_created() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("earlier.mkv"), b"x").unwrap();
        let manifest =
            parse_str("config: {type: video, remux: mkv}\nitems:\n  - urls: [\"https://v/1\"]\n").unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            produce: Some("Clip.webm"),
            ..ScriptedFetcher::default()
        });
        let muxer = Arc::new(RecordingMuxer::default());

        let result = executor(fetcher)
            .with_muxer(muxer.clone())
            .execute(&manifest, &base(), dir.path(), &CancellationToken::new())
            .await;

        assert!(result.success);
        let requests = muxer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].inputs, vec![dir.path().join("Clip.webm")]);
        assert_eq!(requests[0].container, "mkv");
    }

    #[test]
    fn temporary_files_are_recognised() {
        assert!(is_temporary(Path::new("/w/a.mp4.part")));
        assert!(is_temporary(Path::new("/w/a.ytdl")));
        assert!(!is_temporary(Path::new("/w/a.mp4")));
    }
}
