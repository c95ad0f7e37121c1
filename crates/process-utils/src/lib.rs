//! Small process-related helpers shared across the workspace.
//!
//! Besides the Windows no-window helpers, the `tokio` feature provides
//! [`run_captured`], which runs a child to completion under a hard deadline
//! while collecting its output line by line.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
pub use captured::{CapturedRun, OutputLine, RunError, StreamKind, run_captured};

#[cfg(feature = "tokio")]
mod captured {
    use std::process::{ExitStatus, Stdio};
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
    use tokio::process::Command;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// How long to keep draining pipes after the child has been killed.
    const DRAIN_GRACE: Duration = Duration::from_millis(500);

    /// Which pipe a captured line came from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum StreamKind {
        Stdout,
        Stderr,
    }

    /// One line of child output.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct OutputLine {
        pub stream: StreamKind,
        pub line: String,
    }

    /// Result of a child that exited on its own before the deadline.
    #[derive(Debug)]
    pub struct CapturedRun {
        pub status: ExitStatus,
        pub elapsed: Duration,
        pub lines: Vec<OutputLine>,
    }

    impl CapturedRun {
        /// Lines written to stderr, in arrival order.
        pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
            self.lines
                .iter()
                .filter(|l| l.stream == StreamKind::Stderr)
                .map(|l| l.line.as_str())
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum RunError {
        #[error("failed to spawn {program}: {source}")]
        Spawn {
            program: String,
            #[source]
            source: std::io::Error,
        },

        #[error("failed to wait for {program}: {source}")]
        Wait {
            program: String,
            #[source]
            source: std::io::Error,
        },

        /// The deadline passed; the child was killed and reaped.
        #[error("{program} was killed after {elapsed:?}")]
        TimedOut {
            program: String,
            elapsed: Duration,
            lines: Vec<OutputLine>,
        },
    }

    /// Run `command` until it exits or `deadline` passes.
    ///
    /// Stdout and stderr are piped and collected; stdin is closed. The child is
    /// spawned with `kill_on_drop`, so dropping the returned future (for example
    /// from an outer `tokio::time::timeout`) also terminates it. When the
    /// deadline passes first the child is killed and reaped before
    /// [`RunError::TimedOut`] is returned.
    pub async fn run_captured(
        command: &mut Command,
        deadline: Instant,
    ) -> Result<CapturedRun, RunError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let start = Instant::now();

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, StreamKind::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, StreamKind::Stderr, tx.clone());
        }
        drop(tx);

        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                let mut lines = Vec::new();
                while let Some(line) = rx.recv().await {
                    lines.push(line);
                }
                Ok(CapturedRun {
                    status,
                    elapsed: start.elapsed(),
                    lines,
                })
            }
            Ok(Err(source)) => Err(RunError::Wait { program, source }),
            Err(_) => {
                // kill() also waits for the child, so no zombie is left behind.
                let _ = child.kill().await;
                let mut lines = Vec::new();
                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while let Some(line) = rx.recv().await {
                        lines.push(line);
                    }
                })
                .await;
                Err(RunError::TimedOut {
                    program,
                    elapsed: start.elapsed(),
                    lines,
                })
            }
        }
    }

    fn forward_lines<R>(reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(OutputLine { stream, line }).is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(all(test, unix))]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_run_captured_collects_both_streams() {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");

            let run = run_captured(&mut cmd, Instant::now() + Duration::from_secs(10))
                .await
                .unwrap();

            assert_eq!(run.status.code(), Some(3));
            assert!(run.lines.iter().any(|l| l.stream == StreamKind::Stdout && l.line == "out"));
            assert_eq!(run.stderr_lines().collect::<Vec<_>>(), vec!["err"]);
        }

        #[tokio::test]
        async fn test_run_captured_kills_on_deadline() {
            let mut cmd = Command::new("sleep");
            cmd.arg("30");

            let started = Instant::now();
            let err = run_captured(&mut cmd, Instant::now() + Duration::from_millis(300))
                .await
                .unwrap_err();

            assert!(matches!(err, RunError::TimedOut { .. }));
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_run_captured_spawn_failure() {
            let mut cmd = Command::new("/definitely/not/a/real/binary");
            let err = run_captured(&mut cmd, Instant::now() + Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, RunError::Spawn { .. }));
        }
    }
}
