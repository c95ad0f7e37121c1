//! Job record entity.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::state::JobStatus;
use super::step::{PendingStep, StepKind, StepOutcome, StepTimelineEntry, Ticket};
use crate::domain::error_kind::{ErrorKind, JobError};
use crate::{Error, Result};

/// Opaque job identifier: 32 lowercase hex characters.
///
/// The id is used verbatim in file names, so parsing rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::not_found("Job", raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// References to the inputs every step of the job consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    /// Stored upload, relative to the uploads directory.
    pub video_filename: String,
    /// Name of the file as the user uploaded it.
    pub original_filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Result payload of a successful step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub step: Option<StepKind>,
    pub ticket: Ticket,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_url: Option<String>,
    /// Whether the render used word-level highlighting.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub karaoke: bool,
}

/// How long records live after their last access.
#[derive(Debug, Clone, Copy)]
pub struct RetentionWindow {
    pub default: Duration,
    pub pinned: Duration,
}

impl RetentionWindow {
    pub fn from_days(default_days: i64, pinned_days: i64) -> Self {
        Self {
            default: Duration::days(default_days),
            pinned: Duration::days(pinned_days),
        }
    }

    pub fn expiry(&self, last_accessed_at: DateTime<Utc>, pinned: bool) -> DateTime<Utc> {
        last_accessed_at + if pinned { self.pinned } else { self.default }
    }
}

impl Default for RetentionWindow {
    fn default() -> Self {
        Self::from_days(14, 30)
    }
}

/// Persisted unit of work for one uploaded project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    #[serde(default)]
    pub owner: Option<String>,
    pub title: String,
    pub input: JobInput,
    pub status: JobStatus,
    #[serde(default)]
    pub current_step: Option<StepKind>,
    #[serde(default)]
    pub failed_step: Option<StepKind>,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default)]
    pub output: Option<JobOutput>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub step_timeline: Vec<StepTimelineEntry>,
    #[serde(default)]
    pub pending_steps: Vec<PendingStep>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tombstoned: bool,
}

impl JobRecord {
    /// Create a record for a freshly stored upload.
    ///
    /// The upload itself already happened on the request path, so the timeline
    /// starts with a closed `upload` entry and the job waits for its first step.
    pub fn new(
        job_id: JobId,
        owner: Option<String>,
        title: impl Into<String>,
        input: JobInput,
        now: DateTime<Utc>,
        retention: &RetentionWindow,
    ) -> Self {
        let mut upload = StepTimelineEntry::started(StepKind::Upload, 0, now);
        upload.close(StepOutcome::Success, now, None, None);

        Self {
            job_id,
            owner,
            title: title.into(),
            input,
            status: JobStatus::Queued,
            current_step: None,
            failed_step: None,
            error: None,
            output: None,
            created_at: now,
            last_accessed_at: now,
            expires_at: retention.expiry(now, false),
            pinned: false,
            locked: false,
            locked_at: None,
            step_timeline: vec![upload],
            pending_steps: Vec::new(),
            tombstoned: false,
        }
    }

    fn set_status(&mut self, target: JobStatus) -> Result<()> {
        self.status = self.status.transition_to(target)?;
        Ok(())
    }

    fn clear_result(&mut self) {
        self.error = None;
        self.output = None;
        self.failed_step = None;
    }

    /// Record a newly enqueued step.
    ///
    /// Finished jobs go back to `queued`; a job that is currently processing
    /// keeps its status and only gains the pending entry.
    pub fn enqueue_step(&mut self, step: StepKind, ticket: Ticket, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            self.set_status(JobStatus::Queued)?;
            self.clear_result();
        }
        self.pending_steps.push(PendingStep {
            step,
            ticket,
            enqueued_at: now,
        });
        Ok(())
    }

    /// True when a newer enqueue of the same step kind is still pending.
    pub fn is_superseded(&self, step: StepKind, ticket: Ticket) -> bool {
        step.is_supersedable()
            && self
                .pending_steps
                .iter()
                .any(|p| p.step == step && p.ticket > ticket)
    }

    /// True when a step enqueued before `ticket` has not started yet.
    pub fn has_earlier_pending(&self, ticket: Ticket) -> bool {
        self.pending_steps.iter().any(|p| p.ticket < ticket)
    }

    /// Forget a pending step that will never run. Returns whether it was pending.
    pub fn drop_pending(&mut self, ticket: Ticket) -> bool {
        let before = self.pending_steps.len();
        self.pending_steps.retain(|p| p.ticket != ticket);
        if self.pending_steps.len() == before {
            return false;
        }
        // Nothing left to wait for: fall back to the last closed outcome.
        if self.status == JobStatus::Queued && self.pending_steps.is_empty() {
            self.restore_last_result();
        }
        true
    }

    fn restore_last_result(&mut self) {
        let last = self
            .step_timeline
            .iter()
            .rev()
            .find(|e| matches!(e.outcome, Some(StepOutcome::Success | StepOutcome::Failure)));
        match last {
            Some(entry) if entry.outcome == Some(StepOutcome::Failure) => {
                self.status = JobStatus::Failed;
                self.failed_step = Some(entry.step);
                self.error = entry.error.clone();
            }
            Some(entry) => {
                self.status = JobStatus::Completed;
                self.output = Some(entry.output.clone().unwrap_or_else(|| JobOutput {
                    step: Some(entry.step),
                    ticket: entry.ticket,
                    ..Default::default()
                }));
            }
            // Only the upload happened, or the timeline was lost.
            None => {
                self.status = JobStatus::Completed;
                self.output = Some(JobOutput {
                    step: Some(StepKind::Upload),
                    ..Default::default()
                });
            }
        }
    }

    /// Move a pending step into execution.
    pub fn begin_step(&mut self, step: StepKind, ticket: Ticket, now: DateTime<Utc>) -> Result<()> {
        if self.status == JobStatus::Processing {
            return Err(Error::invalid_transition(self.status, JobStatus::Processing));
        }
        self.pending_steps.retain(|p| p.ticket != ticket);
        if self.status.is_terminal() {
            self.set_status(JobStatus::Queued)?;
        }
        self.set_status(JobStatus::Processing)?;
        self.clear_result();
        self.current_step = Some(step);
        self.step_timeline
            .push(StepTimelineEntry::started(step, ticket, now));
        Ok(())
    }

    /// Manual retry of the failed step. Only valid from `failed`.
    ///
    /// Returns the step that will run again.
    pub fn begin_retry(&mut self, ticket: Ticket, now: DateTime<Utc>) -> Result<StepKind> {
        let step = match (self.status, self.failed_step) {
            (JobStatus::Failed, Some(step)) => step,
            _ => return Err(Error::invalid_transition(self.status, "retry")),
        };
        self.set_status(JobStatus::Processing)?;
        self.clear_result();
        self.current_step = Some(step);
        self.step_timeline
            .push(StepTimelineEntry::started(step, ticket, now));
        Ok(step)
    }

    fn open_entry(&mut self, ticket: Ticket) -> Result<&mut StepTimelineEntry> {
        let job_id = self.job_id.to_string();
        self.step_timeline
            .iter_mut()
            .rev()
            .find(|e| e.ticket == ticket && e.is_open())
            .ok_or_else(|| Error::not_found("StepTimelineEntry", format!("{job_id}#{ticket}")))
    }

    /// Close the running step successfully.
    pub fn complete_step(&mut self, ticket: Ticket, output: JobOutput, now: DateTime<Utc>) -> Result<()> {
        self.set_status(JobStatus::Completed)?;
        self.open_entry(ticket)?
            .close(StepOutcome::Success, now, None, Some(output.clone()));
        self.current_step = None;
        self.failed_step = None;
        self.error = None;
        self.output = Some(output);
        Ok(())
    }

    /// Close the running step with a classified error.
    pub fn fail_step(&mut self, ticket: Ticket, error: JobError, now: DateTime<Utc>) -> Result<()> {
        self.set_status(JobStatus::Failed)?;
        let step = self.current_step;
        self.open_entry(ticket)?
            .close(StepOutcome::Failure, now, Some(error.clone()), None);
        self.current_step = None;
        self.failed_step = step;
        self.output = None;
        self.error = Some(error);
        Ok(())
    }

    /// Close the running step without publishing its result because a newer
    /// enqueue of the same kind is waiting.
    pub fn supersede_step(&mut self, ticket: Ticket, now: DateTime<Utc>) -> Result<()> {
        self.set_status(JobStatus::Queued)?;
        self.open_entry(ticket)?
            .close(StepOutcome::Superseded, now, None, None);
        self.current_step = None;
        self.clear_result();
        Ok(())
    }

    /// Fail whatever step was running when the process stopped.
    ///
    /// Returns `true` when the record changed.
    pub fn interrupt_in_flight(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let step = self.current_step;
        let error = JobError::new(
            ErrorKind::DependencyFailure,
            "Processing was interrupted by a service restart.",
        )
        .with_hint("Retry the step.");

        for entry in self.step_timeline.iter_mut().filter(|e| e.is_open()) {
            entry.close(StepOutcome::Interrupted, now, Some(error.clone()), None);
        }
        self.status = JobStatus::Failed;
        self.current_step = None;
        self.failed_step = step;
        self.output = None;
        self.error = Some(error);
        true
    }

    /// Record an access and push out the expiry.
    pub fn touch(&mut self, now: DateTime<Utc>, retention: &RetentionWindow) {
        self.last_accessed_at = now;
        self.expires_at = retention.expiry(now, self.pinned);
    }

    pub fn set_pinned(&mut self, pinned: bool, retention: &RetentionWindow) {
        self.pinned = pinned;
        self.expires_at = retention.expiry(self.last_accessed_at, pinned);
    }

    pub fn set_locked(&mut self, locked: bool, now: DateTime<Utc>) {
        self.locked = locked;
        self.locked_at = locked.then_some(now);
    }

    /// Whether an editor lock is in force. Locks older than `ttl` are stale.
    pub fn is_lock_active(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (self.locked, self.locked_at) {
            (false, _) => false,
            (true, Some(at)) => at + ttl > now,
            (true, None) => true,
        }
    }

    /// Whether `owner` may run lifecycle actions on this job.
    ///
    /// Legacy records without an owner accept anyone.
    pub fn is_owned_by(&self, owner: Option<&str>) -> bool {
        match (&self.owner, owner) {
            (None, _) => true,
            (Some(own), Some(caller)) => own == caller,
            (Some(_), None) => false,
        }
    }

    /// The newest timeline entry per step kind.
    pub fn latest_steps(&self) -> BTreeMap<StepKind, &StepTimelineEntry> {
        let mut latest = BTreeMap::new();
        for entry in &self.step_timeline {
            latest.insert(entry.step, entry);
        }
        latest
    }

    /// Highest ticket referenced anywhere on the record.
    pub fn max_ticket(&self) -> Ticket {
        let from_timeline = self.step_timeline.iter().map(|e| e.ticket);
        let from_pending = self.pending_steps.iter().map(|p| p.ticket);
        from_timeline.chain(from_pending).max().unwrap_or(0)
    }

    /// Check the record-level invariants. Returns a description of the first
    /// violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        match self.status {
            JobStatus::Completed if self.output.is_none() || self.error.is_some() => {
                return Err("completed job must have output and no error".into());
            }
            JobStatus::Failed if self.error.is_none() || self.output.is_some() => {
                return Err("failed job must have error and no output".into());
            }
            JobStatus::Queued | JobStatus::Processing
                if self.error.is_some() || self.output.is_some() =>
            {
                return Err("non-terminal job must not carry error or output".into());
            }
            _ => {}
        }
        if self.current_step.is_some() != (self.status == JobStatus::Processing) {
            return Err("current_step must be set exactly while processing".into());
        }
        let open = self.step_timeline.iter().filter(|e| e.is_open()).count();
        if open > usize::from(self.status == JobStatus::Processing) {
            return Err("only the running step may have an open timeline entry".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::generate(),
            Some("alice".into()),
            "Clip",
            JobInput {
                video_filename: "clip.mp4".into(),
                original_filename: "clip.mp4".into(),
                language: None,
            },
            Utc::now(),
            &RetentionWindow::default(),
        )
    }

    fn output(ticket: Ticket) -> JobOutput {
        JobOutput {
            step: Some(StepKind::PreviewRender),
            ticket,
            video_url: Some("/outputs/x/preview.mp4".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_id_parse_rejects_paths() {
        assert!(JobId::parse("../../etc/passwd").is_err());
        assert!(JobId::parse("ABCDEF0123456789abcdef0123456789").is_err());
        let id = JobId::generate();
        assert_eq!(JobId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_happy_path_keeps_invariants() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::Transcribe, 1, now).unwrap();
        job.check_invariants().unwrap();

        job.begin_step(StepKind::Transcribe, 1, now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.current_step, Some(StepKind::Transcribe));
        job.check_invariants().unwrap();

        job.complete_step(1, output(1), now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.current_step.is_none());
        job.check_invariants().unwrap();
        assert_eq!(job.step_timeline.len(), 2);
    }

    #[test]
    fn test_failure_sets_failed_step() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::ExportKaraoke, 4, now).unwrap();
        job.begin_step(StepKind::ExportKaraoke, 4, now).unwrap();
        job.fail_step(4, JobError::new(ErrorKind::Timeout, "too slow"), now)
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_step, Some(StepKind::ExportKaraoke));
        assert_eq!(job.error.as_ref().unwrap().code, ErrorKind::Timeout);
        job.check_invariants().unwrap();
    }

    #[test]
    fn test_retry_rejected_unless_failed() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::Transcribe, 1, now).unwrap();
        job.begin_step(StepKind::Transcribe, 1, now).unwrap();
        job.complete_step(1, output(1), now).unwrap();

        let before = job.clone();
        assert!(job.begin_retry(2, now).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn test_retry_appends_new_entry() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::Transcribe, 1, now).unwrap();
        job.begin_step(StepKind::Transcribe, 1, now).unwrap();
        job.fail_step(1, JobError::new(ErrorKind::DependencyFailure, "x"), now)
            .unwrap();

        let step = job.begin_retry(2, now).unwrap();
        assert_eq!(step, StepKind::Transcribe);
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.error.is_none());
        assert_eq!(job.step_timeline.len(), 3);
        assert_eq!(job.step_timeline[1].outcome, Some(StepOutcome::Failure));
        job.check_invariants().unwrap();
    }

    #[test]
    fn test_dropping_the_only_step_restores_upload_result() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::Transcribe, 1, now).unwrap();
        assert!(job.drop_pending(1));

        assert_eq!(job.status, JobStatus::Completed);
        let output = job.output.as_ref().unwrap();
        assert_eq!(output.step, Some(StepKind::Upload));
        assert_eq!(output.ticket, 0);
        assert!(output.video_url.is_none());
        job.check_invariants().unwrap();
    }

    #[test]
    fn test_earlier_pending_ticket_is_reported() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::ExportStandard, 3, now).unwrap();
        job.enqueue_step(StepKind::PreviewRender, 5, now).unwrap();

        assert!(job.has_earlier_pending(5));
        assert!(!job.has_earlier_pending(3));
        job.begin_step(StepKind::ExportStandard, 3, now).unwrap();
        assert!(!job.has_earlier_pending(5));
    }

    #[test]
    fn test_enqueue_while_processing_keeps_status() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::PreviewRender, 1, now).unwrap();
        job.begin_step(StepKind::PreviewRender, 1, now).unwrap();
        job.enqueue_step(StepKind::PreviewRender, 2, now).unwrap();

        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.is_superseded(StepKind::PreviewRender, 1));
        assert!(!job.is_superseded(StepKind::PreviewRender, 2));

        job.supersede_step(1, now).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.step_timeline.last().unwrap().outcome, Some(StepOutcome::Superseded));
        job.check_invariants().unwrap();
    }

    #[test]
    fn test_drop_last_pending_restores_previous_result() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::PreviewRender, 1, now).unwrap();
        job.begin_step(StepKind::PreviewRender, 1, now).unwrap();
        job.complete_step(1, output(1), now).unwrap();

        job.enqueue_step(StepKind::PreviewRender, 2, now).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.drop_pending(2));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output.as_ref().unwrap().ticket, 1);
        job.check_invariants().unwrap();
    }

    #[test]
    fn test_interrupt_in_flight() {
        let mut job = record();
        let now = Utc::now();
        job.enqueue_step(StepKind::Transcribe, 1, now).unwrap();
        job.begin_step(StepKind::Transcribe, 1, now).unwrap();

        assert!(job.interrupt_in_flight(now));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_step, Some(StepKind::Transcribe));
        assert_eq!(job.step_timeline.last().unwrap().outcome, Some(StepOutcome::Interrupted));
        job.check_invariants().unwrap();
        assert!(!job.interrupt_in_flight(now));
    }

    #[test]
    fn test_lock_ttl_and_pin_expiry() {
        let mut job = record();
        let now = Utc::now();
        let retention = RetentionWindow::from_days(14, 30);

        job.set_locked(true, now - Duration::minutes(45));
        assert!(!job.is_lock_active(now, Duration::minutes(30)));
        job.set_locked(true, now);
        assert!(job.is_lock_active(now, Duration::minutes(30)));

        job.set_pinned(true, &retention);
        assert_eq!(job.expires_at, job.last_accessed_at + Duration::days(30));
    }

    #[test]
    fn test_ownership() {
        let mut job = record();
        assert!(job.is_owned_by(Some("alice")));
        assert!(!job.is_owned_by(Some("bob")));
        assert!(!job.is_owned_by(None));
        job.owner = None;
        assert!(job.is_owned_by(Some("bob")));
    }
}
