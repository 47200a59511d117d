//! Traits and types for media fetching

use crate::options::DownloadOptions;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One invocation of the download collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// URLs fetched together in one invocation, in order
    pub urls: Vec<String>,
    /// Resolved options for this item
    pub options: DownloadOptions,
    /// Directory the downloaded files land in
    pub work_dir: PathBuf,
}

/// Trait for fetching media from a list of URLs
///
/// Implementations must return an error for any failure (network, unsupported
/// URL, post-processing) and must return [`DownloadError::Cancelled`] when
/// `cancel` fires before the fetch finishes.
///
/// [`DownloadError::Cancelled`]: crate::error::DownloadError::Cancelled
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch every URL of the request into its working directory
    async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> crate::Result<()>;

    /// Get the name of this implementation
    fn name(&self) -> &'static str;
}
