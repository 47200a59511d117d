//! Scripted collaborators and a temp-directory harness around `PollLoop`

use async_trait::async_trait;
use pickup_dl::config::{Config, DirsConfig, RetryConfig};
use pickup_dl::error::{DownloadError, NotificationError};
use pickup_dl::fetcher::{FetchRequest, MediaFetcher};
use pickup_dl::notify::{Notification, NotificationSink};
use pickup_dl::options::OverlayMode;
use pickup_dl::{JobExecutor, PollLoop};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fetcher whose behaviour is scripted per URL
///
/// A request fails while any of its URLs still has scripted failures left;
/// each failing request consumes one failure from every such URL. URLs marked
/// as hanging block until cancellation.
#[derive(Default)]
pub struct ScriptedFetcher {
    failures: Mutex<HashMap<String, u32>>,
    hanging: Vec<String>,
    calls: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    /// A fetcher where every URL succeeds
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Make `url` fail `times` times before succeeding
    pub fn fail(self, url: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    /// Make `url` fail on every attempt
    pub fn always_fail(self, url: &str) -> Self {
        self.fail(url, u32::MAX)
    }

    /// Make `url` block until the fetch is cancelled
    pub fn hang(mut self, url: &str) -> Self {
        self.hanging.push(url.to_string());
        self
    }

    /// Every request received, in order
    pub fn calls(&self) -> Vec<FetchRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests that carried `url`
    pub fn attempts_for(&self, url: &str) -> usize {
        self.calls()
            .iter()
            .filter(|r| r.urls.iter().any(|u| u == url))
            .count()
    }
}

#[async_trait]
impl MediaFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        cancel: &CancellationToken,
    ) -> pickup_dl::Result<()> {
        self.calls.lock().unwrap().push(request.clone());

        if request.urls.iter().any(|u| self.hanging.contains(u)) {
            cancel.cancelled().await;
            return Err(DownloadError::Cancelled.into());
        }

        let mut failures = self.failures.lock().unwrap();
        let mut failed = false;
        for url in &request.urls {
            if let Some(left) = failures.get_mut(url)
                && *left > 0
            {
                *left = left.saturating_sub(1);
                failed = true;
            }
        }

        if failed {
            return Err(DownloadError::ToolFailed {
                tool: "yt-dlp".to_string(),
                exit_code: Some(1),
                message: "ERROR: scripted failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Notification sink that records every message
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    /// A sink that records and then reports a delivery failure
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Messages received so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(NotificationError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A `PollLoop` over temp directories with scripted collaborators
pub struct Harness {
    /// Keeps the directories alive
    pub dir: TempDir,
    /// Directory layout in use
    pub dirs: DirsConfig,
    /// Loop under test
    pub poll: PollLoop,
    /// Scripted fetcher
    pub fetcher: Arc<ScriptedFetcher>,
    /// Recording notifier
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    /// Build a harness with two attempts per item and no retry delay
    pub async fn new(fetcher: ScriptedFetcher) -> Self {
        Self::with_notifier(fetcher, RecordingNotifier::default()).await
    }

    /// Build a harness with a specific notifier
    pub async fn with_notifier(fetcher: ScriptedFetcher, notifier: RecordingNotifier) -> Self {
        let dir = TempDir::new().unwrap();
        let dirs = DirsConfig {
            downloader_dir: dir.path().join("downloader"),
            landing_dir: dir.path().join("landing"),
        };
        pickup_dl::lifecycle::ensure_layout(&dirs).await.unwrap();

        let config = Config {
            dirs: dirs.clone(),
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::ZERO,
                ..RetryConfig::default()
            },
            ..Config::default()
        };

        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(notifier);
        let executor = JobExecutor::new(
            fetcher.clone(),
            config.retry.clone(),
            OverlayMode::Positional,
            dirs.cookie_file(),
        );
        let poll = PollLoop::new(config, executor, notifier.clone());

        Self {
            dir,
            dirs,
            poll,
            fetcher,
            notifier,
        }
    }

    /// Drop a manifest into the pickup directory
    pub fn drop_manifest(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dirs.pickup_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// File names currently in the pickup directory
    pub fn pickup(&self) -> Vec<String> {
        names_in(&self.dirs.pickup_dir())
    }

    /// File names currently in the processed directory
    pub fn processed(&self) -> Vec<String> {
        names_in(&self.dirs.processed_dir())
    }

    /// File names currently in the errors directory
    pub fn errors(&self) -> Vec<String> {
        names_in(&self.dirs.errors_dir())
    }
}

/// Sorted entry names of a directory
pub fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
