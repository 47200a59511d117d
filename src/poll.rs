//! The daemon's poll loop
//!
//! One iteration scans the pickup directory once, non-recursively, and
//! handles each regular file to completion before looking at the next:
//! parse, execute, then move to `processed/` or `errors/`. Per-file failures
//! are logged, counted and notified, and the loop carries on. Anything that
//! prevents the scan itself is fatal.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::JobExecutor;
use crate::lifecycle::{execution_timestamp, move_to};
use crate::manifest;
use crate::notify::{Notification, NotificationSink, push_best_effort};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Consecutive-failure count per manifest file name
///
/// An entry appears on the first failure, grows by one with each further
/// failure, and disappears on the first success. Absent means zero. The table
/// lives in memory only, so a restart forgets every count.
#[derive(Clone, Debug, Default)]
pub struct ErrorCounts {
    counts: HashMap<String, u32>,
}

impl ErrorCounts {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for `name` (0 when unseen)
    pub fn get(&self, name: &str) -> u32 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    /// Whether `name` has an entry
    pub fn contains(&self, name: &str) -> bool {
        self.counts.contains_key(name)
    }

    /// Record a failure and return the new count
    pub fn record_failure(&mut self, name: &str) -> u32 {
        let count = self.counts.entry(name.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Record a success, returning the count that was cleared
    pub fn record_success(&mut self, name: &str) -> Option<u32> {
        self.counts.remove(name)
    }

    /// Number of files with at least one recorded failure
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no failures are recorded
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// What happened to one pickup entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Moved to the processed directory
    Processed {
        /// New location
        moved_to: PathBuf,
    },
    /// Counted as a failure
    Failed {
        /// New location, `None` when the move to errors failed too
        moved_to: Option<PathBuf>,
        /// Consecutive failures for this file name, this one included
        consecutive_failures: u32,
    },
    /// Interrupted by shutdown; the file stays in pickup
    Interrupted,
}

/// Tally of one iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Files moved to processed
    pub processed: usize,
    /// Files counted as failed
    pub failed: usize,
    /// Entries that were not regular files
    pub skipped: usize,
    /// Whether shutdown cut the iteration short
    pub interrupted: bool,
}

/// Long-lived poll loop owning the error-count table
pub struct PollLoop {
    config: Config,
    executor: JobExecutor,
    notifier: Arc<dyn NotificationSink>,
    error_counts: ErrorCounts,
}

impl PollLoop {
    /// Create a loop over the configured directories
    pub fn new(config: Config, executor: JobExecutor, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            config,
            executor,
            notifier,
            error_counts: ErrorCounts::new(),
        }
    }

    /// Current error-count table
    pub fn error_counts(&self) -> &ErrorCounts {
        &self.error_counts
    }

    /// Run until shutdown is requested or a fatal error occurs
    ///
    /// Returns `Ok(())` on graceful shutdown. A fatal error is logged, sent as
    /// a final notification, and returned.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(
            pickup = %self.config.dirs.pickup_dir().display(),
            interval_secs = self.config.poll.interval.as_secs(),
            "poll loop started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.run_iteration(cancel).await {
                return Err(self.shut_down_fatally(e).await);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll.interval) => {}
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!("shutdown requested, poll loop stopped");
        Ok(())
    }

    /// Run a single iteration with the same fatal handling as [`PollLoop::run`]
    pub async fn run_once(&mut self, cancel: &CancellationToken) -> Result<IterationSummary> {
        match self.run_iteration(cancel).await {
            Ok(summary) => Ok(summary),
            Err(e) => Err(self.shut_down_fatally(e).await),
        }
    }

    async fn shut_down_fatally(&self, error: Error) -> Error {
        tracing::error!(
            error = %error,
            error_code = error.error_code(),
            fatal = true,
            "fatal error, shutting down"
        );
        let notification = Notification::fatal(&error, &self.config.notifications.title);
        push_best_effort(self.notifier.as_ref(), &notification).await;
        error
    }

    /// Scan the pickup directory once and handle every regular file in it
    ///
    /// # Errors
    /// Only a failure to enumerate the pickup directory is returned; it is
    /// fatal to the caller.
    pub async fn run_iteration(&mut self, cancel: &CancellationToken) -> Result<IterationSummary> {
        let pickup = self.config.dirs.pickup_dir();
        let entries = list_entries(&pickup).await.map_err(|e| {
            Error::Fatal(format!(
                "failed to enumerate pickup directory {}: {e}",
                pickup.display()
            ))
        })?;

        let mut summary = IterationSummary::default();

        for path in entries {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    tracing::warn!(path = %path.display(), "skipping non-file entry in pickup directory");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pickup entry");
                    summary.skipped += 1;
                    continue;
                }
            }

            match self.process_file(&path, cancel).await {
                FileOutcome::Processed { .. } => summary.processed += 1,
                FileOutcome::Failed { .. } => summary.failed += 1,
                FileOutcome::Interrupted => {
                    summary.interrupted = true;
                    break;
                }
            }
        }

        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            interrupted = summary.interrupted,
            "poll iteration complete"
        );

        Ok(summary)
    }

    /// Handle one manifest file to completion
    pub async fn process_file(&mut self, path: &Path, cancel: &CancellationToken) -> FileOutcome {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let timestamp = execution_timestamp(Utc::now());

        tracing::info!(file = %name, "processing manifest");

        let manifest = match manifest::parse(path) {
            Ok(manifest) => manifest,
            Err(e) => {
                let error = Error::from(e);
                return self
                    .fail(path, &name, &timestamp, error.error_code(), &error.to_string())
                    .await;
            }
        };

        let landing = &self.config.dirs.landing_dir;
        let base = JobExecutor::base_options(landing, &name);
        let work_dir = JobExecutor::work_dir(landing, &name);

        tracing::debug!(
            file = %name,
            mode = %manifest.mode,
            items = manifest.items.len(),
            work_dir = %work_dir.display(),
            "manifest parsed"
        );

        let job = self.executor.execute(&manifest, &base, &work_dir, cancel).await;

        if job.cancelled {
            tracing::info!(file = %name, "interrupted by shutdown, manifest left in pickup");
            return FileOutcome::Interrupted;
        }

        if !job.success {
            let reason = format!(
                "{} of {} item(s) failed",
                job.failed_items(),
                manifest.items.len()
            );
            return self
                .fail(path, &name, &timestamp, "job_failed", &reason)
                .await;
        }

        match move_to(path, &self.config.dirs.processed_dir(), &timestamp).await {
            Ok(moved_to) => {
                if let Some(previous) = self.error_counts.record_success(&name) {
                    tracing::info!(file = %name, previous_failures = previous, "error count cleared");
                }
                tracing::info!(file = %name, moved_to = %moved_to.display(), "manifest processed");
                FileOutcome::Processed { moved_to }
            }
            Err(e) => {
                let error = Error::from(e);
                self.fail(path, &name, &timestamp, error.error_code(), &error.to_string())
                    .await
            }
        }
    }

    async fn fail(
        &mut self,
        path: &Path,
        name: &str,
        timestamp: &str,
        error_code: &'static str,
        reason: &str,
    ) -> FileOutcome {
        let moved_to = match move_to(path, &self.config.dirs.errors_dir(), timestamp).await {
            Ok(dest) => Some(dest),
            Err(e) => {
                tracing::error!(file = %name, error = %e, "failed to move manifest to errors directory");
                None
            }
        };

        let consecutive_failures = self.error_counts.record_failure(name);
        tracing::error!(
            file = %name,
            error = %reason,
            error_code = error_code,
            consecutive_failures = consecutive_failures,
            "manifest failed"
        );

        let notification =
            Notification::file_failed(name, consecutive_failures, &self.config.notifications.title);
        push_best_effort(self.notifier.as_ref(), &notification).await;

        FileOutcome::Failed {
            moved_to,
            consecutive_failures,
        }
    }
}

async fn list_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        paths.push(entry.path());
    }
    Ok(paths)
}
