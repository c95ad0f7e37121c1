//! Closed error taxonomy for job failures.

use serde::{Deserialize, Serialize};

/// Classification of a failed step.
///
/// Every failure surfaced on a job record is one of these; raw tool output
/// goes to the per-job log instead.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The media or the edited subtitles cannot be processed as given.
    InputInvalid,
    /// The step exceeded its time budget and was killed.
    Timeout,
    /// An external tool failed or is missing.
    DependencyFailure,
    /// Disk quota or queue capacity is exhausted.
    ResourceExhausted,
    /// A referenced job or artifact does not exist.
    NotFound,
    /// The request does not fit the job's current state.
    Conflict,
}

impl ErrorKind {
    /// Hint shown to the user when the failing code path has nothing better.
    pub fn default_hint(&self) -> &'static str {
        match self {
            Self::InputInvalid => "Check the uploaded video or the edited subtitles and try again.",
            Self::Timeout => "The video may be too long for this step. Retry or use a shorter clip.",
            Self::DependencyFailure => "A processing tool failed. Retry the step; see the job log for details.",
            Self::ResourceExhausted => "Storage is full. Delete old projects or try again later.",
            Self::NotFound => "The project or one of its files no longer exists.",
            Self::Conflict => "The project is busy. Wait for the current step to finish.",
        }
    }
}

/// User-facing error payload stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl JobError {
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Fill in the taxonomy's default hint if none was given.
    pub fn with_default_hint(mut self) -> Self {
        if self.hint.is_none() {
            self.hint = Some(self.code.default_hint().to_string());
        }
        self
    }
}
