//! Configuration types for pickup-dl
//!
//! The daemon is normally configured from the environment (see
//! [`Config::from_env`]). A JSON file can be supplied instead, in which case
//! any environment variables that are set still take precedence.

use crate::error::{Error, Result};
use crate::options::OverlayMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base downloader directory (holds `pickup/`, `processed/`, `errors/`, `cookies.txt`)
pub const ENV_DOWNLOADER_DIR: &str = "VIDEO_DOWNLOADER_DIR";
/// Media landing directory
pub const ENV_LANDING_DIR: &str = "VIDEO_LANDING_DIR";
/// Poll interval in seconds
pub const ENV_SLEEP_INTERVAL: &str = "SLEEP_INTERVAL";
/// Notification endpoint base URL
pub const ENV_GOTIFY_URL: &str = "GOTIFY_URL";
/// Notification application token
pub const ENV_GOTIFY_TOKEN: &str = "GOTIFY_APP_TOKEN";
/// Download invocation timeout in seconds
pub const ENV_DOWNLOAD_TIMEOUT: &str = "DOWNLOAD_TIMEOUT";
/// Explicit yt-dlp binary path
pub const ENV_YTDLP_PATH: &str = "YTDLP_PATH";
/// Explicit ffmpeg binary path
pub const ENV_FFMPEG_PATH: &str = "FFMPEG_PATH";

/// Directory layout
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirsConfig {
    /// Base directory holding the lifecycle directories and the cookie file
    pub downloader_dir: PathBuf,

    /// Root under which each manifest gets its own output directory
    pub landing_dir: PathBuf,
}

impl Default for DirsConfig {
    fn default() -> Self {
        Self {
            downloader_dir: PathBuf::from("./downloader"),
            landing_dir: PathBuf::from("./media"),
        }
    }
}

impl DirsConfig {
    /// Directory operators drop manifests into
    pub fn pickup_dir(&self) -> PathBuf {
        self.downloader_dir.join("pickup")
    }

    /// Directory for successfully processed manifests
    pub fn processed_dir(&self) -> PathBuf {
        self.downloader_dir.join("processed")
    }

    /// Directory for failed manifests
    pub fn errors_dir(&self) -> PathBuf {
        self.downloader_dir.join("errors")
    }

    /// Cookie file handed to the downloader when a manifest sets `cookies: true`
    pub fn cookie_file(&self) -> PathBuf {
        self.downloader_dir.join("cookies.txt")
    }
}

/// Poll loop settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Sleep between iterations (default: 300 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

/// Retry configuration for download items
///
/// `max_attempts` counts every attempt, the first one included: an item that
/// keeps failing is tried exactly `max_attempts` times.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 0 seconds)
    #[serde(default, with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// External tool paths and invocation limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Upper bound for a single download invocation (default: 4 hours)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,

    /// Upper bound for a single mux invocation (default: 1 hour)
    #[serde(default = "default_transcode_timeout", with = "duration_serde")]
    pub transcode_timeout: Duration,

    /// How per-item `opts` overlays combine with the job options
    #[serde(default)]
    pub overlay_mode: OverlayMode,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            ffmpeg_path: None,
            search_path: true,
            download_timeout: default_download_timeout(),
            transcode_timeout: default_transcode_timeout(),
            overlay_mode: OverlayMode::default(),
        }
    }
}

impl ToolsConfig {
    /// Resolve the yt-dlp binary, preferring the explicit path
    pub fn resolve_yt_dlp(&self) -> Option<PathBuf> {
        resolve_binary(self.yt_dlp_path.as_deref(), "yt-dlp", self.search_path)
    }

    /// Resolve the ffmpeg binary, preferring the explicit path
    pub fn resolve_ffmpeg(&self) -> Option<PathBuf> {
        resolve_binary(self.ffmpeg_path.as_deref(), "ffmpeg", self.search_path)
    }
}

fn resolve_binary(explicit: Option<&Path>, name: &str, search_path: bool) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None if search_path => which::which(name).ok(),
        None => None,
    }
}

/// Push notification settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send notifications (default: false; disabled sinks only log)
    #[serde(default)]
    pub enabled: bool,

    /// Endpoint base URL; messages are POSTed to `<endpoint>/message`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Application token passed as the `token` query parameter
    #[serde(default)]
    pub token: Option<String>,

    /// Title attached to every message
    #[serde(default = "default_notification_title")]
    pub title: String,

    /// Timeout for notification requests (default: 10 seconds)
    #[serde(default = "default_notification_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            token: None,
            title: default_notification_title(),
            timeout: default_notification_timeout(),
        }
    }
}

/// Main configuration for the daemon
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory layout
    #[serde(default)]
    pub dirs: DirsConfig,

    /// Poll loop settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Per-item retry behaviour
    #[serde(default)]
    pub retry: RetryConfig,

    /// External tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Push notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl Config {
    /// Build the configuration from the process environment
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    ///
    /// `VIDEO_DOWNLOADER_DIR` and `VIDEO_LANDING_DIR` are required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in [ENV_DOWNLOADER_DIR, ENV_LANDING_DIR] {
            if lookup(key).is_none_or(|value| value.trim().is_empty()) {
                return Err(Error::Config {
                    message: format!("environment variable {key} must be set"),
                    key: Some(key.to_string()),
                });
            }
        }

        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
            key: None,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse config file {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Override fields with any variables the lookup provides
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_DOWNLOADER_DIR) {
            self.dirs.downloader_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get(ENV_LANDING_DIR) {
            self.dirs.landing_dir = PathBuf::from(dir);
        }
        if let Some(secs) = get(ENV_SLEEP_INTERVAL) {
            self.poll.interval = parse_secs(ENV_SLEEP_INTERVAL, &secs)?;
        }
        if let Some(secs) = get(ENV_DOWNLOAD_TIMEOUT) {
            self.tools.download_timeout = parse_secs(ENV_DOWNLOAD_TIMEOUT, &secs)?;
        }
        if let Some(path) = get(ENV_YTDLP_PATH) {
            self.tools.yt_dlp_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_FFMPEG_PATH) {
            self.tools.ffmpeg_path = Some(PathBuf::from(path));
        }

        let endpoint = get(ENV_GOTIFY_URL);
        let token = get(ENV_GOTIFY_TOKEN);
        if let (Some(endpoint), Some(token)) = (endpoint, token) {
            self.notifications.endpoint = Some(endpoint);
            self.notifications.token = Some(token);
            self.notifications.enabled = true;
        }

        Ok(())
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".into(),
                key: Some("poll.interval".into()),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".into(),
                key: Some("retry.max_attempts".into()),
            });
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "retry.backoff_multiplier must be a finite number of at least 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
                key: Some("retry.backoff_multiplier".into()),
            });
        }
        if self.notifications.enabled && self.notifications.endpoint.is_none() {
            return Err(Error::Config {
                message: "notifications are enabled but no endpoint is configured".into(),
                key: Some("notifications.endpoint".into()),
            });
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| Error::Config {
            message: format!("{key} must be a whole number of seconds, got {value:?}: {e}"),
            key: Some(key.to_string()),
        })
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

fn default_transcode_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_notification_title() -> String {
    "Youtube-dl Daemon".to_string()
}

fn default_notification_timeout() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
