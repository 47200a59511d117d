//! Best-effort operator notifications
//!
//! Messages are POSTed as JSON to `<endpoint>/message?token=<token>` on a
//! Gotify-compatible server. Delivery failures are logged at `warn` and never
//! change a job outcome; [`push_best_effort`] is the only entry point the
//! poll loop uses.

use crate::config::NotificationConfig;
use crate::error::{Error, NotificationError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Priority of a first-time file failure
pub const BASE_FAILURE_PRIORITY: u8 = 5;
/// Highest priority a repeated file failure escalates to
pub const MAX_FAILURE_PRIORITY: u8 = 8;
/// Priority of the shutdown message after a fatal error
pub const FATAL_PRIORITY: u8 = 7;

/// Priority for a file that has now failed `consecutive_failures` times in a row
///
/// 5 for the first failure, one more for each repeat, capped at 8.
pub fn failure_priority(consecutive_failures: u32) -> u8 {
    let extra = consecutive_failures.saturating_sub(1).min(u32::from(u8::MAX));
    BASE_FAILURE_PRIORITY
        .saturating_add(extra as u8)
        .min(MAX_FAILURE_PRIORITY)
}

/// A message body as sent on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Human-readable text
    pub message: String,
    /// Priority 1-9
    pub priority: u8,
    /// Message title
    pub title: String,
}

impl Notification {
    /// Message for a manifest that failed processing
    pub fn file_failed(file_name: &str, consecutive_failures: u32, title: &str) -> Self {
        Self {
            message: format!("Encountered error processing file {file_name}"),
            priority: failure_priority(consecutive_failures),
            title: title.to_string(),
        }
    }

    /// Final message before the daemon stops on a fatal error
    pub fn fatal(error: &Error, title: &str) -> Self {
        Self {
            message: format!("Service shutting down. Fatal error encountered {error}"),
            priority: FATAL_PRIORITY,
            title: title.to_string(),
        }
    }
}

/// Trait for notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;

    /// Get the name of this implementation
    fn name(&self) -> &'static str;
}

/// Send a notification, logging (never returning) any failure
///
/// Returns whether delivery succeeded.
pub async fn push_best_effort(sink: &dyn NotificationSink, notification: &Notification) -> bool {
    match sink.send(notification).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                sink = sink.name(),
                priority = notification.priority,
                error = %e,
                "notification failed"
            );
            false
        }
    }
}

/// Build the sink described by the configuration
///
/// Returns a [`DisabledNotifier`] unless notifications are enabled with both
/// an endpoint and a token.
pub fn from_config(config: &NotificationConfig) -> crate::Result<Arc<dyn NotificationSink>> {
    match (config.enabled, &config.endpoint, &config.token) {
        (true, Some(endpoint), Some(token)) => {
            let notifier = GotifyNotifier::new(endpoint, token, config.timeout).map_err(|e| {
                Error::Config {
                    message: e.to_string(),
                    key: Some(crate::config::ENV_GOTIFY_URL.to_string()),
                }
            })?;
            Ok(Arc::new(notifier))
        }
        _ => Ok(Arc::new(DisabledNotifier)),
    }
}

/// Gotify-compatible HTTP notifier
pub struct GotifyNotifier {
    client: reqwest::Client,
    message_url: Url,
    timeout: Duration,
}

impl GotifyNotifier {
    /// Create a notifier posting to `<endpoint>/message?token=<token>`
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self, NotificationError> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| NotificationError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        let mut message_url = base
            .join("message")
            .map_err(|e| NotificationError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        message_url.query_pairs_mut().append_pair("token", token);

        Ok(Self {
            client: reqwest::Client::new(),
            message_url,
            timeout,
        })
    }

    /// The full URL messages are posted to
    pub fn message_url(&self) -> &Url {
        &self.message_url
    }
}

#[async_trait]
impl NotificationSink for GotifyNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let request = self
            .client
            .post(self.message_url.clone())
            .json(notification)
            .timeout(self.timeout);

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| NotificationError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(priority = notification.priority, "notification sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gotify"
    }
}

/// Sink used when notifications are not configured; it only logs
pub struct DisabledNotifier;

#[async_trait]
impl NotificationSink for DisabledNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            message = %notification.message,
            priority = notification.priority,
            "skipping notification, notifications are disabled"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
