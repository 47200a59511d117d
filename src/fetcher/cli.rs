//! yt-dlp fetcher using the external binary

use super::args::to_ytdlp_args;
use super::traits::{FetchRequest, MediaFetcher};
use crate::error::{DownloadError, Error};
use crate::process::{ToolCommand, WorkDirSnapshot};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOOL: &str = "yt-dlp";

/// Fetcher that runs the external `yt-dlp` binary
///
/// Each fetch is a single `yt-dlp` invocation carrying every URL of the
/// request. The child runs inside the request's working directory. When the
/// invocation is cancelled or times out, the files it created there are
/// removed before the error is returned.
///
/// # Examples
///
/// ```no_run
/// use pickup_dl::fetcher::YtDlpFetcher;
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// // Create with explicit path
/// let fetcher = YtDlpFetcher::new(PathBuf::from("/usr/local/bin/yt-dlp"), Duration::from_secs(3600));
///
/// // Or auto-discover from PATH
/// let fetcher = YtDlpFetcher::from_path(Duration::from_secs(3600))
///     .expect("yt-dlp not found in PATH");
/// ```
pub struct YtDlpFetcher {
    binary_path: PathBuf,
    timeout: Duration,
}

impl YtDlpFetcher {
    /// Create a fetcher with an explicit binary path
    ///
    /// # Arguments
    ///
    /// * `binary_path` - Path to the yt-dlp binary
    /// * `timeout` - Upper bound for one invocation
    pub fn new(binary_path: PathBuf, timeout: Duration) -> Self {
        Self {
            binary_path,
            timeout,
        }
    }

    /// Attempt to find yt-dlp in PATH
    ///
    /// Returns `None` if the binary is not found.
    pub fn from_path(timeout: Duration) -> Option<Self> {
        which::which(TOOL).ok().map(|path| Self::new(path, timeout))
    }

    /// Path of the binary this fetcher runs
    pub fn binary_path(&self) -> &std::path::Path {
        &self.binary_path
    }

    /// Full argument list for a request: rendered options, then the URLs
    pub fn build_args(request: &FetchRequest) -> Vec<String> {
        let mut args = to_ytdlp_args(&request.options);
        args.push("--".to_string());
        args.extend(request.urls.iter().cloned());
        args
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> crate::Result<()> {
        tokio::fs::create_dir_all(&request.work_dir).await?;
        let snapshot = WorkDirSnapshot::capture(&request.work_dir).await?;

        let command = ToolCommand::new(TOOL, &self.binary_path)
            .args(Self::build_args(request))
            .current_dir(&request.work_dir)
            .timeout(self.timeout);

        let outcome = command
            .run(cancel)
            .await
            .and_then(|output| output.into_result(TOOL));

        match outcome {
            Ok(()) => Ok(()),
            Err(e @ (DownloadError::Cancelled | DownloadError::Timeout { .. })) => {
                let removed = snapshot.discard_new_files().await;
                tracing::info!(
                    work_dir = %request.work_dir.display(),
                    removed = removed,
                    "discarded partial downloads"
                );
                Err(Error::Download(e))
            }
            Err(e) => Err(Error::Download(e)),
        }
    }

    fn name(&self) -> &'static str {
        "yt-dlp-cli"
    }
}
