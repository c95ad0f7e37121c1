//! Utility functions for processors.

use std::path::Path;

use process_utils::{CapturedRun, RunError, run_captured};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::StepError;
use super::traits::StepContext;

/// Run an external tool for a step, logging its output to the job log.
///
/// The child is killed at the step deadline. A missing binary is a
/// dependency failure; an overrun is a timeout.
pub async fn run_tool(ctx: &StepContext, tool: &str, command: &mut Command) -> Result<CapturedRun, StepError> {
    debug!(
        job_id = %ctx.job_id(),
        step = %ctx.step,
        tool,
        args = ?command.as_std().get_args().collect::<Vec<_>>(),
        "Running tool"
    );

    match run_captured(command, ctx.deadline).await {
        Ok(run) => {
            ctx.log.output(tool, &run.lines).await;
            ctx.log
                .note(format!(
                    "{tool} exited with {} after {:.1}s",
                    run.status,
                    run.elapsed.as_secs_f64()
                ))
                .await;
            Ok(run)
        }
        Err(RunError::TimedOut { lines, elapsed, .. }) => {
            ctx.log.output(tool, &lines).await;
            ctx.log
                .note(format!("{tool} killed after {:.1}s (time budget)", elapsed.as_secs_f64()))
                .await;
            warn!(job_id = %ctx.job_id(), step = %ctx.step, tool, "Tool exceeded the step deadline");
            Err(ctx.timed_out())
        }
        Err(RunError::Spawn { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            ctx.log.note(format!("{tool} is not installed")).await;
            Err(StepError::dependency(tool, "not installed"))
        }
        Err(e) => {
            ctx.log.note(e.to_string()).await;
            Err(StepError::dependency(tool, e.to_string()))
        }
    }
}

/// Turn a non-zero exit into a dependency failure.
pub fn ensure_success(tool: &str, run: &CapturedRun) -> Result<(), StepError> {
    if run.status.success() {
        return Ok(());
    }
    let last = run.stderr_lines().last().unwrap_or("no diagnostics");
    Err(StepError::dependency(tool, format!("{} ({last})", run.status)))
}

/// Escape a value for use inside a single-quoted ffmpeg filter option.
pub fn escape_filter_path(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// `subtitles` filter burning `ass_path` into the video.
pub fn subtitles_filter(ass_path: &Path, fonts_dir: Option<&Path>) -> String {
    let filename = escape_filter_path(&ass_path.to_string_lossy());
    match fonts_dir {
        Some(fonts) => format!(
            "subtitles=filename='{}':fontsdir='{}'",
            filename,
            escape_filter_path(&fonts.to_string_lossy())
        ),
        None => format!("subtitles=filename='{filename}'"),
    }
}

/// File-name-safe version of a project title.
pub fn sanitize_file_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "video".to_string()
    } else {
        stem.chars().take(80).collect()
    }
}
