//! Bounded retry loop for download items
//!
//! [`run_with_retry`] makes at most `max_attempts` attempts and reports how
//! the loop ended as a [`RetryOutcome`] value instead of an error, so callers
//! can tell "every attempt failed" apart from "stopped early".
//!
//! # Example
//!
//! ```no_run
//! use pickup_dl::retry::{IsRetryable, RetryOutcome, run_with_retry};
//! use pickup_dl::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! let outcome = run_with_retry(&config, &cancel, |_attempt| async { Ok::<_, Flaky>(()) }).await;
//! assert!(matches!(outcome, RetryOutcome::Succeeded { attempts: 1, .. }));
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, Error, NotificationError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (tool crashed, network hiccup, timeout) return `true`.
/// Terminal failures (binary missing, shutdown requested, bad manifest) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Download(e) => match e {
                DownloadError::ToolFailed { .. } => true,
                DownloadError::Timeout { .. } => true,
                DownloadError::AttemptsExhausted { .. } => false,
                DownloadError::Cancelled => false,
                DownloadError::ToolNotFound { .. } => false,
            },
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Notification(e) => match e {
                NotificationError::Request(inner) => inner.is_timeout() || inner.is_connect(),
                NotificationError::Timeout(_) => true,
                NotificationError::Status { status, .. } => *status >= 500,
                NotificationError::InvalidEndpoint(_) => false,
            },
            Error::Config { .. } => false,
            Error::Manifest(_) => false,
            Error::Filesystem(_) => false,
            Error::Fatal(_) => false,
            Error::Serialization(_) => false,
        }
    }
}

/// How a retry loop ended
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded
    Succeeded {
        /// Value returned by the successful attempt
        value: T,
        /// Attempts made, the successful one included
        attempts: u32,
    },
    /// Every allowed attempt failed with a retryable error
    Exhausted {
        /// Error of the final attempt
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// An attempt failed with a non-retryable error
    Aborted {
        /// The terminal error
        error: E,
        /// Attempts made
        attempts: u32,
    },
    /// Cancellation was requested while waiting between attempts
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
    },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of attempts the loop made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Aborted { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run an async operation at most `config.max_attempts` times
///
/// The operation receives the 1-based attempt number. A `max_attempts` of
/// zero is treated as one.
pub async fn run_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(
                    error = %e,
                    attempt = attempt,
                    "operation failed with non-retryable error"
                );
                return RetryOutcome::Aborted {
                    error: e,
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    error = %e,
                    attempts = attempt,
                    "operation failed after all attempts exhausted"
                );
                return RetryOutcome::Exhausted {
                    error: e,
                    attempts: attempt,
                };
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "attempt failed, retrying"
                );

                let wait = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                if !wait.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => {
                            return RetryOutcome::Cancelled { attempts: attempt };
                        }
                    }
                }

                // A multiplier that yields no valid duration saturates at the cap.
                let next_secs = delay.as_secs_f64() * config.backoff_multiplier;
                delay = Duration::try_from_secs_f64(next_secs)
                    .unwrap_or(config.max_delay)
                    .min(config.max_delay);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::try_from_secs_f64(jittered_secs).unwrap_or(delay)
}
