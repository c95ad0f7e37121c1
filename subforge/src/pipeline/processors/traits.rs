//! Processor trait and related types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::error::StepError;
use crate::domain::{JobId, JobOutput, JobRecord, StepKind, Ticket};
use crate::storage::{ArtifactStore, JobLog, SubtitleStore};

/// Everything a processor needs to run one step of one job.
#[derive(Clone)]
pub struct StepContext {
    /// Snapshot of the record taken when the step started.
    pub job: JobRecord,
    pub step: StepKind,
    pub ticket: Ticket,
    /// Subprocesses started by the step are killed at this instant.
    pub deadline: Instant,
    pub budget: Duration,
    pub artifacts: Arc<ArtifactStore>,
    pub subtitles: Arc<SubtitleStore>,
    pub log: JobLog,
}

impl StepContext {
    pub fn job_id(&self) -> &JobId {
        &self.job.job_id
    }

    /// The stored upload.
    pub fn video_path(&self) -> PathBuf {
        self.artifacts.upload_path(&self.job.input.video_filename)
    }

    pub fn timed_out(&self) -> StepError {
        StepError::Timeout {
            step: self.step,
            budget: self.budget,
        }
    }
}

/// Output from a processor.
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutput {
    /// Published on the job record when the step completes.
    pub output: JobOutput,
    /// Processing duration in seconds.
    pub duration_secs: f64,
    /// Steps to enqueue for the same job after this one completes.
    pub follow_up: Vec<StepKind>,
}

/// Trait for pipeline processors.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The step kinds this processor can run.
    fn steps(&self) -> &'static [StepKind];

    fn can_process(&self, step: StepKind) -> bool {
        self.steps().contains(&step)
    }

    /// Run the step.
    ///
    /// # Cancel Safety
    ///
    /// The worker drops this future when the step overruns its budget.
    /// Implementations must only replace published artifacts after the work
    /// is complete, so a dropped future leaves at most a partial file behind.
    async fn process(&self, ctx: &StepContext) -> Result<ProcessorOutput, StepError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Processor for Noop {
        fn steps(&self) -> &'static [StepKind] {
            &[StepKind::ExportStandard, StepKind::ExportKaraoke]
        }

        async fn process(&self, _ctx: &StepContext) -> Result<ProcessorOutput, StepError> {
            Ok(ProcessorOutput::default())
        }

        fn name(&self) -> &'static str {
            "noop"
        }
    }

    #[test]
    fn test_can_process_uses_step_list() {
        assert!(Noop.can_process(StepKind::ExportKaraoke));
        assert!(!Noop.can_process(StepKind::Transcribe));
    }

    #[test]
    fn test_processor_output_default() {
        let output = ProcessorOutput::default();
        assert!(output.follow_up.is_empty());
        assert_eq!(output.output.ticket, 0);
        assert_eq!(output.duration_secs, 0.0);
    }
}
