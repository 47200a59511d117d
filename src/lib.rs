//! # pickup-dl
//!
//! Folder-driven media download daemon.
//!
//! Operators drop YAML manifests into a pickup directory. The daemon polls
//! that directory, downloads what each manifest describes with `yt-dlp`
//! (optionally remuxing with `ffmpeg`), then files the manifest under
//! `processed/` or `errors/` with an execution timestamp appended to its name.
//!
//! ## Directory layout
//!
//! ```text
//! $VIDEO_DOWNLOADER_DIR/
//!   pickup/       manifests waiting to be processed
//!   processed/    <name>_<YYYYMMDDTHHMMSS> after success
//!   errors/       <name>_<YYYYMMDDTHHMMSS> after failure
//!   cookies.txt   used by manifests with `cookies: true`
//! $VIDEO_LANDING_DIR/
//!   <manifest name>/   downloaded media
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pickup_dl::{Config, shutdown_on_signal, start};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(shutdown_on_signal(cancel.clone()));
//!
//!     let mut poll = start(config).await?;
//!     poll.run(&cancel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Per-manifest job execution
pub mod executor;
/// External download collaborator
pub mod fetcher;
/// Manifest file moves between lifecycle directories
pub mod lifecycle;
/// Manifest parsing
pub mod manifest;
/// Operator notifications
pub mod notify;
/// Download option maps
pub mod options;
/// Poll loop and error-count table
pub mod poll;
/// External process handling
pub mod process;
/// Bounded retry loop
pub mod retry;
/// ffmpeg mux collaborator
pub mod transcode;

use notify::push_best_effort;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Re-export commonly used types
pub use config::Config;
pub use error::{
    DownloadError, Error, FilesystemError, ManifestError, NotificationError, Result,
};
pub use executor::{JobExecutor, JobResult};
pub use fetcher::{FetchRequest, MediaFetcher, NoOpFetcher, YtDlpFetcher};
pub use manifest::{DownloadItem, DownloadMode, Manifest};
pub use notify::{DisabledNotifier, GotifyNotifier, Notification, NotificationSink};
pub use options::{DownloadOptions, OverlayMode};
pub use poll::{ErrorCounts, IterationSummary, PollLoop};
pub use transcode::{FfmpegMuxer, Muxer};

/// Wire a [`PollLoop`] from configuration
///
/// Locates `yt-dlp` and `ffmpeg` (explicit paths first, then `PATH`). A
/// missing `yt-dlp` falls back to [`NoOpFetcher`], so every manifest fails
/// into `errors/` instead of the daemon refusing to start. A missing `ffmpeg`
/// only affects manifests that ask for `remux`.
pub fn build_poll_loop(config: Config, notifier: Arc<dyn NotificationSink>) -> PollLoop {
    let fetcher: Arc<dyn MediaFetcher> = match config.tools.resolve_yt_dlp() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using yt-dlp");
            Arc::new(YtDlpFetcher::new(path, config.tools.download_timeout))
        }
        None => {
            tracing::warn!("yt-dlp not found, every download will fail");
            Arc::new(NoOpFetcher)
        }
    };

    let mut executor = JobExecutor::new(
        fetcher,
        config.retry.clone(),
        config.tools.overlay_mode,
        config.dirs.cookie_file(),
    );

    match config.tools.resolve_ffmpeg() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using ffmpeg");
            executor = executor.with_muxer(Arc::new(FfmpegMuxer::new(
                path,
                config.tools.transcode_timeout,
            )));
        }
        None => tracing::warn!("ffmpeg not found, manifests requesting remux will fail"),
    }

    PollLoop::new(config, executor, notifier)
}

/// Build the configured notifier, then [`start_with`] it
pub async fn start(config: Config) -> Result<PollLoop> {
    let notifier = notify::from_config(&config.notifications)?;
    start_with(config, notifier).await
}

/// Prepare the directory layout and wire the poll loop around `notifier`
///
/// A failure here is fatal: the operator gets the final notification before
/// the error is returned.
pub async fn start_with(config: Config, notifier: Arc<dyn NotificationSink>) -> Result<PollLoop> {
    tracing::info!(sink = notifier.name(), "notifications configured");

    if let Err(e) = lifecycle::ensure_layout(&config.dirs).await {
        let error = Error::from(e);
        tracing::error!(error = %error, error_code = error.error_code(), "startup failed");
        let notification = Notification::fatal(&error, &config.notifications.title);
        push_best_effort(notifier.as_ref(), &notification).await;
        return Err(error);
    }

    Ok(build_poll_loop(config, notifier))
}

/// Cancel `token` once a termination signal arrives
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn shutdown_on_signal(token: CancellationToken) {
    wait_for_signal().await;
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
