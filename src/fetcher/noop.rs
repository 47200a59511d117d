//! No-op fetcher for when no downloader binary is available

use super::traits::{FetchRequest, MediaFetcher};
use crate::error::DownloadError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Fetcher used when `yt-dlp` could not be located
///
/// Every fetch fails with [`DownloadError::ToolNotFound`], which is terminal,
/// so each manifest fails fast and lands in `errors/` instead of the daemon
/// refusing to start.
///
/// # Examples
///
/// ```
/// use pickup_dl::fetcher::{FetchRequest, MediaFetcher, NoOpFetcher};
/// use pickup_dl::options::DownloadOptions;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() {
/// let request = FetchRequest {
///     urls: vec!["https://example.com/v".into()],
///     options: DownloadOptions::new(),
///     work_dir: std::env::temp_dir(),
/// };
/// assert!(NoOpFetcher.fetch(&request, &CancellationToken::new()).await.is_err());
/// # }
/// ```
pub struct NoOpFetcher;

#[async_trait]
impl MediaFetcher for NoOpFetcher {
    async fn fetch(&self, request: &FetchRequest, _cancel: &CancellationToken) -> crate::Result<()> {
        tracing::warn!(urls = ?request.urls, "no downloader available, failing fetch");
        Err(DownloadError::ToolNotFound {
            tool: "yt-dlp".to_string(),
        }
        .into())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
