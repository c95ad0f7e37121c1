//! Job domain module.

mod entity;
mod state;
mod step;

pub use entity::{JobId, JobInput, JobOutput, JobRecord, RetentionWindow};
pub use state::JobStatus;
pub use step::{PendingStep, StepKind, StepOutcome, StepTimelineEntry, Ticket};
