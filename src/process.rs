//! Scoped child-process handle for external tools
//!
//! [`ToolCommand`] spawns one external binary, streams its combined stdout and
//! stderr line by line into `debug` events tagged with the tool name, and waits
//! for exit under an optional timeout. The child is killed when the timeout
//! fires, when cancellation is requested, or when the handle is dropped.
//!
//! [`WorkDirSnapshot`] records the files present in a working directory so the
//! files an invocation created can be found (and discarded) afterwards.

use crate::error::DownloadError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit information of a finished tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Whether the process exited with status 0
    pub success: bool,
    /// Exit code, `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Last non-empty output line (stderr preferred)
    pub last_line: Option<String>,
}

impl ToolOutput {
    /// Convert a non-zero exit into [`DownloadError::ToolFailed`]
    pub fn into_result(self, tool: &str) -> Result<(), DownloadError> {
        if self.success {
            return Ok(());
        }
        Err(DownloadError::ToolFailed {
            tool: tool.to_string(),
            exit_code: self.exit_code,
            message: self
                .last_line
                .unwrap_or_else(|| "no output captured".to_string()),
        })
    }
}

/// One invocation of an external binary
#[derive(Debug, Clone)]
pub struct ToolCommand {
    tool: String,
    program: PathBuf,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ToolCommand {
    /// Create a command for `program`, logged under the name `tool`
    pub fn new(tool: impl Into<String>, program: impl AsRef<Path>) -> Self {
        Self {
            tool: tool.into(),
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the child inside `dir`
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Kill the child if it has not exited after `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Spawn the child and wait for it to exit
    ///
    /// Returns `Ok` with the exit information whatever the exit code was;
    /// use [`ToolOutput::into_result`] to treat a non-zero exit as an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ToolOutput, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        tracing::debug!(
            tool = %self.tool,
            program = %self.program.display(),
            args = ?self.args,
            "spawning external tool"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DownloadError::ToolNotFound {
                tool: self.tool.clone(),
            },
            _ => DownloadError::ToolFailed {
                tool: self.tool.clone(),
                exit_code: None,
                message: format!("failed to spawn: {e}"),
            },
        })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|out| stream_lines(self.tool.clone(), "stdout", out));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| stream_lines(self.tool.clone(), "stderr", err));

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status,
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                tracing::warn!(tool = %self.tool, timeout_secs = secs, "external tool timed out, killing process");
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %self.tool, error = %e, "failed to kill timed out process");
                }
                return Err(DownloadError::Timeout { tool: self.tool.clone(), secs });
            }
            _ = cancel.cancelled() => {
                tracing::info!(tool = %self.tool, "shutdown requested, killing external tool");
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %self.tool, error = %e, "failed to kill cancelled process");
                }
                return Err(DownloadError::Cancelled);
            }
        };

        let status = status.map_err(|e| DownloadError::ToolFailed {
            tool: self.tool.clone(),
            exit_code: None,
            message: format!("failed to wait for process: {e}"),
        })?;

        let stdout_last = join_last_line(stdout_task).await;
        let stderr_last = join_last_line(stderr_task).await;

        let output = ToolOutput {
            success: status.success(),
            exit_code: status.code(),
            last_line: stderr_last.or(stdout_last),
        };

        tracing::debug!(
            tool = %self.tool,
            exit_code = ?output.exit_code,
            success = output.success,
            "external tool exited"
        );

        Ok(output)
    }
}

fn stream_lines<R>(tool: String, stream: &'static str, reader: R) -> JoinHandle<Option<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            tracing::debug!(tool = %tool, stream = stream, "{}", trimmed);
            last = Some(trimmed.to_string());
        }
        last
    })
}

async fn join_last_line(task: Option<JoinHandle<Option<String>>>) -> Option<String> {
    match task {
        Some(handle) => handle.await.ok().flatten(),
        None => None,
    }
}

/// The set of files present in a directory at one point in time
#[derive(Debug, Clone)]
pub struct WorkDirSnapshot {
    dir: PathBuf,
    existing: HashSet<PathBuf>,
}

impl WorkDirSnapshot {
    /// Record the regular files currently in `dir` (a missing directory is empty)
    pub async fn capture(dir: &Path) -> std::io::Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            existing: list_files(dir).await?.into_iter().collect(),
        })
    }

    /// Files present now that were absent when the snapshot was taken, sorted by path
    pub async fn new_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut created: Vec<PathBuf> = list_files(&self.dir)
            .await?
            .into_iter()
            .filter(|p| !self.existing.contains(p))
            .collect();
        created.sort();
        Ok(created)
    }

    /// Remove every file created since the snapshot, returning how many were removed
    ///
    /// Removal failures are logged and skipped.
    pub async fn discard_new_files(&self) -> usize {
        let created = match self.new_files().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to list working directory for cleanup");
                return 0;
            }
        };

        let mut removed = 0;
        for path in created {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "removed partial output file");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove partial output file");
                }
            }
        }
        removed
    }
}

async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
