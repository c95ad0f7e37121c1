//! Step failures and their classification into the job error taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{ErrorKind, JobError, StepKind};

/// Why a step did not produce its output.
///
/// Messages are written for the user; tool diagnostics belong in the job log.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("{message}")]
    InputInvalid {
        message: String,
        hint: Option<String>,
    },

    #[error("{step} exceeded its time budget of {}s", budget.as_secs())]
    Timeout { step: StepKind, budget: Duration },

    #[error("{tool} failed: {message}")]
    DependencyFailure { tool: String, message: String },

    #[error("{0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] crate::Error),
}

impl StepError {
    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::InputInvalid {
            message: message.into(),
            hint: None,
        }
    }

    pub fn input_invalid_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::InputInvalid {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn dependency(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DependencyFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputInvalid { .. } => ErrorKind::InputInvalid,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::DependencyFailure { .. } => ErrorKind::DependencyFailure,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Internal(e) => internal_kind(e),
        }
    }

    /// The user-facing payload stored on the failed job.
    pub fn classify(&self) -> JobError {
        let kind = self.kind();
        let error = match self {
            Self::InputInvalid { message, hint } => {
                let error = JobError::new(kind, message.clone());
                match hint {
                    Some(hint) => error.with_hint(hint.clone()),
                    None => error,
                }
            }
            Self::Timeout { step, budget } => JobError::new(
                kind,
                format!("The {step} step did not finish within {}s.", budget.as_secs()),
            ),
            Self::DependencyFailure { tool, .. } => {
                JobError::new(kind, format!("The {tool} tool failed while processing the video."))
            }
            Self::ResourceExhausted(message) | Self::NotFound(message) => {
                JobError::new(kind, message.clone())
            }
            Self::Internal(crate::Error::Validation(message)) => JobError::new(kind, message.clone()),
            Self::Internal(e) if kind == ErrorKind::NotFound => {
                JobError::new(kind, format!("A required file is missing: {e}"))
            }
            Self::Internal(_) if kind == ErrorKind::ResourceExhausted => {
                JobError::new(kind, "There is not enough disk space to finish the step.")
            }
            Self::Internal(_) => JobError::new(kind, "An internal error interrupted the step."),
        };
        error.with_default_hint()
    }
}

fn internal_kind(error: &crate::Error) -> ErrorKind {
    use crate::Error;

    if error.is_not_found() {
        return ErrorKind::NotFound;
    }
    match error {
        Error::Validation(_) => ErrorKind::InputInvalid,
        Error::StorageFull { .. } | Error::QueueFull { .. } => ErrorKind::ResourceExhausted,
        Error::Io(e) | Error::IoPath { source: e, .. } if e.kind() == std::io::ErrorKind::StorageFull => {
            ErrorKind::ResourceExhausted
        }
        _ => ErrorKind::DependencyFailure,
    }
}
