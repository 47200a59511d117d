//! ffmpeg mux collaborator
//!
//! Combines the files one download item produced into a single container with
//! stream copy. On a non-zero exit every file the invocation created is
//! removed; on success the inputs are removed and only the muxed file stays.

use crate::error::{DownloadError, Error};
use crate::process::{ToolCommand, WorkDirSnapshot};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOOL: &str = "ffmpeg";

/// Builder for an ffmpeg mux invocation
#[derive(Debug, Clone, PartialEq)]
pub struct MuxCommand {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    metadata: Vec<(String, String)>,
}

impl MuxCommand {
    /// Mux `inputs` into `output`, copying every stream
    pub fn new(inputs: Vec<PathBuf>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs,
            output: output.as_ref().to_path_buf(),
            metadata: Vec::new(),
        }
    }

    /// Add a container metadata tag
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Output path
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        for index in 0..self.inputs.len() {
            args.push("-map".to_string());
            args.push(index.to_string());
        }

        args.push("-c".to_string());
        args.push("copy".to_string());

        for (key, value) in &self.metadata {
            args.push("-metadata".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// What to mux for one item
#[derive(Debug, Clone, PartialEq)]
pub struct MuxRequest {
    /// Files produced by the download, in path order
    pub inputs: Vec<PathBuf>,
    /// Directory holding the inputs and receiving the output
    pub work_dir: PathBuf,
    /// Target container extension (e.g., "mkv")
    pub container: String,
}

impl MuxRequest {
    /// Title tag derived from the first input's file stem
    pub fn title(&self) -> String {
        self.inputs
            .first()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Output path `<title>.<container>`, or `<title>.remux.<container>` when
    /// that would overwrite an input
    pub fn output_path(&self) -> PathBuf {
        let plain = self
            .work_dir
            .join(format!("{}.{}", self.title(), self.container));
        if self.inputs.contains(&plain) {
            self.work_dir
                .join(format!("{}.remux.{}", self.title(), self.container))
        } else {
            plain
        }
    }
}

/// Trait for the external mux/transcode step
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Mux the request's inputs into one file and return its path
    async fn mux(&self, request: &MuxRequest, cancel: &CancellationToken) -> crate::Result<PathBuf>;
}

/// Muxer that runs the external `ffmpeg` binary
pub struct FfmpegMuxer {
    binary_path: PathBuf,
    timeout: Duration,
}

impl FfmpegMuxer {
    /// Create a muxer with an explicit binary path
    pub fn new(binary_path: PathBuf, timeout: Duration) -> Self {
        Self {
            binary_path,
            timeout,
        }
    }

    /// Command for a request
    pub fn command_for(request: &MuxRequest) -> MuxCommand {
        MuxCommand::new(request.inputs.clone(), request.output_path())
            .metadata("title", request.title())
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(&self, request: &MuxRequest, cancel: &CancellationToken) -> crate::Result<PathBuf> {
        if request.inputs.is_empty() {
            return Err(Error::Download(DownloadError::ToolFailed {
                tool: TOOL.to_string(),
                exit_code: None,
                message: "no input files to mux".to_string(),
            }));
        }

        let mux = Self::command_for(request);
        let snapshot = WorkDirSnapshot::capture(&request.work_dir).await?;

        let outcome = ToolCommand::new(TOOL, &self.binary_path)
            .args(mux.build_args())
            .current_dir(&request.work_dir)
            .timeout(self.timeout)
            .run(cancel)
            .await
            .and_then(|output| output.into_result(TOOL));

        if let Err(e) = outcome {
            let removed = snapshot.discard_new_files().await;
            tracing::warn!(
                output = %mux.output().display(),
                removed = removed,
                error = %e,
                "mux failed, removed files it created"
            );
            return Err(Error::Download(e));
        }

        for input in &request.inputs {
            if let Err(e) = tokio::fs::remove_file(input).await {
                tracing::warn!(path = %input.display(), error = %e, "failed to remove mux input");
            }
        }

        tracing::info!(output = %mux.output().display(), inputs = request.inputs.len(), "muxed item");
        Ok(mux.output().to_path_buf())
    }
}
