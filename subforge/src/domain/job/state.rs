//! Job status state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle status of a job record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// At least one step is waiting in the queue.
    Queued,
    /// A worker is executing `current_step`.
    Processing,
    /// The last step succeeded; `output` is set.
    Completed,
    /// The last step failed; `error` and `failed_step` are set.
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Validate a status transition.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self, target) {
            (Queued, Queued | Processing) => true,
            (Processing, Completed | Failed) => true,
            // A finished step handing over to a newer pending step of the same kind.
            (Processing, Queued) => true,
            // New work enqueued onto a finished job.
            (Completed | Failed, Queued) => true,
            // Manual retry re-enters the runner directly.
            (Failed, Processing) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new status.
    pub fn transition_to(&self, target: JobStatus) -> Result<JobStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self, target))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_retry_only_from_failed() {
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = JobStatus::Queued
            .transition_to(JobStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { ref from, ref to }
            if from == "queued" && to == "completed"));
    }
}
