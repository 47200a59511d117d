//! External media download collaborator
//!
//! The [`MediaFetcher`] trait is the seam between the job executor and the
//! tool that actually fetches media. Two implementations are provided:
//!
//! - [`YtDlpFetcher`]: runs the external `yt-dlp` binary
//! - [`NoOpFetcher`]: used when no downloader is available, every fetch fails
//!
//! ## Usage
//!
//! ```no_run
//! use pickup_dl::fetcher::{FetchRequest, MediaFetcher, YtDlpFetcher};
//! use pickup_dl::options::DownloadOptions;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = YtDlpFetcher::from_path(Duration::from_secs(3600))
//!         .expect("yt-dlp binary not found");
//!
//!     let mut options = DownloadOptions::new();
//!     options.insert("format", "bv*+ba/b");
//!
//!     let request = FetchRequest {
//!         urls: vec!["https://example.com/watch?v=abc".into()],
//!         options,
//!         work_dir: "/srv/media/landing/job.yaml".into(),
//!     };
//!     fetcher.fetch(&request, &CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

mod args;
mod cli;
mod noop;
mod traits;

pub use args::to_ytdlp_args;
pub use cli::YtDlpFetcher;
pub use noop::NoOpFetcher;
pub use traits::{FetchRequest, MediaFetcher};
