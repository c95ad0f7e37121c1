//! Step kinds and the per-job step timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error_kind::JobError;
use crate::domain::job::entity::JobOutput;

/// Monotonically increasing enqueue sequence number.
///
/// For a given job and step kind, the highest ticket is the newest request.
pub type Ticket = u64;

/// The unit of work a job step performs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    Upload,
    Transcribe,
    PreviewRender,
    ExportStandard,
    ExportKaraoke,
}

impl StepKind {
    /// Whether a newer enqueue of this kind replaces an older pending one.
    pub fn is_supersedable(&self) -> bool {
        matches!(self, Self::PreviewRender)
    }
}

/// How a timeline entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failure,
    /// A newer enqueue of the same step kind made this result obsolete.
    Superseded,
    /// The process stopped while the step was running.
    Interrupted,
}

/// One attempt of one step.
///
/// Entries are appended when a step starts and closed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTimelineEntry {
    pub step: StepKind,
    #[serde(default)]
    pub ticket: Ticket,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<StepOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
}

impl StepTimelineEntry {
    pub fn started(step: StepKind, ticket: Ticket, at: DateTime<Utc>) -> Self {
        Self {
            step,
            ticket,
            started_at: at,
            ended_at: None,
            outcome: None,
            error: None,
            output: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Close the entry. Closed entries are never touched again.
    pub(crate) fn close(
        &mut self,
        outcome: StepOutcome,
        at: DateTime<Utc>,
        error: Option<JobError>,
        output: Option<JobOutput>,
    ) -> bool {
        if !self.is_open() {
            return false;
        }
        self.ended_at = Some(at);
        self.outcome = Some(outcome);
        self.error = error;
        self.output = output;
        true
    }
}

/// A step that was enqueued for a job but has not started yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStep {
    pub step: StepKind,
    pub ticket: Ticket,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_step_kind_names() {
        assert_eq!(StepKind::PreviewRender.to_string(), "preview_render");
        assert_eq!(StepKind::from_str("export_karaoke").unwrap(), StepKind::ExportKaraoke);
        assert_eq!(
            serde_json::to_string(&StepKind::ExportStandard).unwrap(),
            "\"export_standard\""
        );
    }

    #[test]
    fn test_closed_entry_is_immutable() {
        let now = Utc::now();
        let mut entry = StepTimelineEntry::started(StepKind::Transcribe, 1, now);
        assert!(entry.close(StepOutcome::Success, now, None, None));
        assert!(!entry.close(StepOutcome::Failure, now, None, None));
        assert_eq!(entry.outcome, Some(StepOutcome::Success));
    }
}
