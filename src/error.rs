//! Error types for pickup-dl
//!
//! Errors are layered the way they are handled, narrowest scope first:
//! - [`ManifestError`] - a manifest could not be parsed (the file goes to `errors/`)
//! - [`DownloadError`] - one download item failed (siblings still run)
//! - [`FilesystemError`] - a lifecycle move failed (ends the current file)
//! - [`NotificationError`] - the push endpoint was unreachable (logged, never propagated)
//! - [`Error::Fatal`] - anything escaping a poll iteration (stops the daemon)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pickup-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pickup-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "VIDEO_LANDING_DIR")
        key: Option<String>,
    },

    /// Malformed or incomplete manifest
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// A download item failed
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Moving a manifest between lifecycle directories failed
    #[error("filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Notification endpoint could not be reached
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),

    /// Unrecoverable failure outside per-file handling
    #[error("fatal error: {0}")]
    Fatal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Manifest parsing errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read
    #[error("failed to read manifest {path}: {source}")]
    Io {
        /// Path of the manifest
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid YAML
    #[error("manifest is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required field is absent
    #[error("missing required field `{field}`")]
    MissingField {
        /// Dotted path of the missing field (e.g., "config.type")
        field: String,
    },

    /// An item has no `urls` list
    #[error("item {index} has no `urls`")]
    ItemMissingUrls {
        /// Zero-based position of the item in `items`
        index: usize,
    },

    /// The `items` list is empty
    #[error("manifest has no items")]
    EmptyItems,

    /// A field is present but has the wrong shape
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Dotted path of the field
        field: String,
        /// Why the value was rejected
        reason: String,
    },
}

/// Errors raised by the external download and transcode collaborators
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Every allowed attempt for an item failed
    #[error("download of {urls:?} failed after {attempts} attempt(s): {last_error}")]
    AttemptsExhausted {
        /// URLs of the failed item
        urls: Vec<String>,
        /// Number of attempts made
        attempts: u32,
        /// Message of the final attempt's error
        last_error: String,
    },

    /// External tool exited unsuccessfully
    #[error("{tool} exited with code {exit_code:?}: {message}")]
    ToolFailed {
        /// Tool name (e.g., "yt-dlp")
        tool: String,
        /// Exit code, `None` when killed by a signal
        exit_code: Option<i32>,
        /// Last meaningful output line
        message: String,
    },

    /// External tool exceeded its invocation timeout
    #[error("{tool} timed out after {secs}s")]
    Timeout {
        /// Tool name
        tool: String,
        /// Timeout in seconds
        secs: u64,
    },

    /// Shutdown was requested while the tool was running
    #[error("cancelled by shutdown request")]
    Cancelled,

    /// External tool binary not found
    #[error("{tool} binary not found")]
    ToolNotFound {
        /// Tool name
        tool: String,
    },
}

/// Lifecycle move errors
#[derive(Debug, Error)]
pub enum FilesystemError {
    /// File move/rename failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// A lifecycle directory could not be created
    #[error("failed to create directory {path}: {reason}")]
    CreateDir {
        /// Directory path
        path: PathBuf,
        /// The reason creation failed
        reason: String,
    },

    /// Invalid path encountered (no file name, non-UTF-8, ...)
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The HTTP request could not be sent
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status
    #[error("endpoint returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly empty)
        body: String,
    },

    /// The request exceeded the configured timeout
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The configured endpoint is not a valid URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl Error {
    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Manifest(_) => "manifest_error",
            Error::Download(e) => match e {
                DownloadError::AttemptsExhausted { .. } => "attempts_exhausted",
                DownloadError::ToolFailed { .. } => "tool_failed",
                DownloadError::Timeout { .. } => "tool_timeout",
                DownloadError::Cancelled => "cancelled",
                DownloadError::ToolNotFound { .. } => "tool_not_found",
            },
            Error::Filesystem(e) => match e {
                FilesystemError::MoveFailed { .. } => "move_failed",
                FilesystemError::CreateDir { .. } => "create_dir_failed",
                FilesystemError::InvalidPath { .. } => "invalid_path",
            },
            Error::Notification(_) => "notification_error",
            Error::Fatal(_) => "fatal",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// True when the error was caused by a shutdown request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Download(DownloadError::Cancelled))
    }
}
