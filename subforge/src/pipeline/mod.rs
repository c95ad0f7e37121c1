//! Job pipeline: the step queue, the manager that owns job lifecycle, the
//! worker pool that executes steps and the retention sweeper.
//!
//! - Requests only enqueue; every step runs on a worker loop
//! - Steps of one job never overlap and run in enqueue order
//! - Pending steps are durable on the job record and survive restarts
//! - Expired and orphaned artifacts are swept in the background

mod job_queue;
mod manager;
pub mod processors;
mod retention;
mod worker_pool;

pub use job_queue::{InMemoryStepQueue, QueueEntry, StepQueue, TicketSequence};
pub use manager::{NewProject, PipelineConfig, PipelineManager, RecoveryReport, SubtitleUpdate};
pub use processors::{
    DivergencePolicy, Processor, ProcessorOutput, RenderConfig, RenderProcessor, StepContext,
    StepError, ToolConfig, TranscribeProcessor, default_processors,
};
pub use retention::{RetentionConfig, RetentionSweeper, SweepReport};
pub use worker_pool::{StepBudgets, WorkerPool, WorkerPoolConfig};
