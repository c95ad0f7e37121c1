//! Domain layer for subforge.
//!
//! Job records and their state machine, the closed error taxonomy, and the
//! subtitle model shared by the API and the task runners.

pub mod error_kind;
pub mod job;
pub mod subtitle;

pub use error_kind::{ErrorKind, JobError};
pub use job::{
    JobId, JobInput, JobOutput, JobRecord, JobStatus, PendingStep, RetentionWindow, StepKind,
    StepOutcome, StepTimelineEntry, Ticket,
};
