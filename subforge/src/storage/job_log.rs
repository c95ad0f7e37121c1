//! Per-job diagnostic log.
//!
//! Subprocess output and step markers are appended here instead of being
//! surfaced to the user. Write failures are logged and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::Utc;
use process_utils::{OutputLine, StreamKind};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::domain::{StepKind, Ticket};

#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the start of a step attempt.
    pub async fn section(&self, step: StepKind, ticket: Ticket) {
        self.write(format!(
            "\n=== {} {} (ticket {}) ===\n",
            Utc::now().to_rfc3339(),
            step,
            ticket
        ))
        .await;
    }

    pub async fn note(&self, message: impl AsRef<str>) {
        self.write(format!("[{}] {}\n", Utc::now().format("%H:%M:%S"), message.as_ref()))
            .await;
    }

    /// Append captured subprocess output, prefixed with the tool name.
    pub async fn output(&self, tool: &str, lines: &[OutputLine]) {
        if lines.is_empty() {
            return;
        }
        let mut buf = String::new();
        for line in lines {
            let stream = match line.stream {
                StreamKind::Stdout => "out",
                StreamKind::Stderr => "err",
            };
            buf.push_str(&format!("{tool}[{stream}] {}\n", line.line));
        }
        self.write(buf).await;
    }

    async fn write(&self, text: String) {
        if let Err(e) = self.try_write(text.as_bytes()).await {
            warn!(path = %self.path.display(), error = %e, "Failed to append to job log");
        }
    }

    async fn try_write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_log_appends() {
        let dir = TempDir::new().unwrap();
        let log = JobLog::new(dir.path().join("logs/job.log"));

        log.section(StepKind::PreviewRender, 9).await;
        log.output(
            "ffmpeg",
            &[OutputLine {
                stream: StreamKind::Stderr,
                line: "frame=1".into(),
            }],
        )
        .await;
        log.note("done").await;

        let text = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(text.contains("preview_render (ticket 9)"));
        assert!(text.contains("ffmpeg[err] frame=1"));
        assert!(text.ends_with("done\n"));
    }
}
