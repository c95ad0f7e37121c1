//! API request and response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    JobError, JobOutput, JobRecord, JobStatus, PendingStep, StepKind, StepOutcome, Ticket,
};

/// `on`/`off` switch as sent by HTML forms and query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    #[serde(alias = "true", alias = "1")]
    On,
    #[serde(alias = "false", alias = "0")]
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

/// Form or query of `POST /jobs/{id}/touch`.
#[derive(Debug, Default, Deserialize)]
pub struct TouchParams {
    pub locked: Option<Switch>,
}

/// Form or query of `POST /jobs/{id}/pin`.
#[derive(Debug, Deserialize)]
pub struct PinParams {
    pub pinned: Switch,
}

/// Body of `POST /projects/{id}/export`.
#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub karaoke: bool,
}

/// Latest timeline entry of one step kind.
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub step: StepKind,
    pub ticket: Ticket,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<StepOutcome>,
}

/// Polling view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub title: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<StepKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    pub pending_steps: Vec<PendingStep>,
    pub steps: Vec<StepSummary>,
    pub pinned: bool,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobStatusResponse {
    fn from(record: &JobRecord) -> Self {
        let steps = record
            .latest_steps()
            .into_values()
            .map(|entry| StepSummary {
                step: entry.step,
                ticket: entry.ticket,
                started_at: entry.started_at,
                ended_at: entry.ended_at,
                outcome: entry.outcome,
            })
            .collect();

        Self {
            job_id: record.job_id.to_string(),
            title: record.title.clone(),
            status: record.status,
            current_step: record.current_step,
            failed_step: record.failed_step,
            error: record.error.clone(),
            output: record.output.clone(),
            pending_steps: record.pending_steps.clone(),
            steps,
            pinned: record.pinned,
            locked: record.locked,
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

/// Entry of `GET /jobs/recent`.
#[derive(Debug, Clone, Serialize)]
pub struct RecentJob {
    pub job_id: String,
    pub title: String,
    pub status: JobStatus,
    pub pinned: bool,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&JobRecord> for RecentJob {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.to_string(),
            title: record.title.clone(),
            status: record.status,
            pinned: record.pinned,
            last_accessed_at: record.last_accessed_at,
            expires_at: record.expires_at,
        }
    }
}

/// Response of every endpoint that enqueues a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketResponse {
    pub job_id: String,
    pub ticket: Ticket,
}

/// Response of a subtitle save or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSubtitlesResponse {
    pub job_id: String,
    pub revision: u64,
    pub blocks: usize,
    pub ticket: Ticket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_accepts_form_values() {
        let params: TouchParams = serde_json::from_str(r#"{"locked": "on"}"#).unwrap();
        assert_eq!(params.locked, Some(Switch::On));
        let params: PinParams = serde_json::from_str(r#"{"pinned": "false"}"#).unwrap();
        assert!(!params.pinned.is_on());
        assert!(serde_json::from_str::<PinParams>(r#"{"pinned": "maybe"}"#).is_err());
    }
}
