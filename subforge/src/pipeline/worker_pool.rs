//! Worker pool implementation for pipeline processing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::PipelineManager;
use crate::domain::StepKind;
use crate::{Error, Result};

fn default_transcribe_secs() -> u64 {
    3600
}

fn default_preview_secs() -> u64 {
    900
}

fn default_export_secs() -> u64 {
    1800
}

/// Wall-clock budget per step kind, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepBudgets {
    #[serde(default = "default_transcribe_secs")]
    pub transcribe_secs: u64,
    #[serde(default = "default_preview_secs")]
    pub preview_secs: u64,
    #[serde(default = "default_export_secs")]
    pub export_secs: u64,
}

impl Default for StepBudgets {
    fn default() -> Self {
        Self {
            transcribe_secs: default_transcribe_secs(),
            preview_secs: default_preview_secs(),
            export_secs: default_export_secs(),
        }
    }
}

impl StepBudgets {
    pub fn budget_for(&self, step: StepKind) -> Duration {
        let secs = match step {
            StepKind::Transcribe => self.transcribe_secs,
            StepKind::ExportStandard | StepKind::ExportKaraoke => self.export_secs,
            StepKind::Upload | StepKind::PreviewRender => self.preview_secs,
        };
        Duration::from_secs(secs)
    }
}

fn default_worker_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    256
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_grace_secs() -> u64 {
    5
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker loops. Steps of one job never overlap regardless.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Maximum number of pending steps across all jobs.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Poll interval in milliseconds, in case a notification is missed.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Extra time past the step budget before the worker abandons the step.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default)]
    pub budgets: StepBudgets,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_secs: default_grace_secs(),
            budgets: StepBudgets::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_budgets(mut self, budgets: StepBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_grace_secs(mut self, secs: u64) -> Self {
        self.grace_secs = secs;
        self
    }
}

/// Long-lived loops that drain the step queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    cancellation_token: CancellationToken,
    tasks: Mutex<JoinSet<Result<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, cancellation_token: CancellationToken) -> Self {
        Self {
            config,
            cancellation_token,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Start the worker loops.
    ///
    /// A worker stops with an error only when the job store can no longer be
    /// written; [`wait`](Self::wait) reports it.
    pub async fn start(&self, manager: Arc<PipelineManager>) {
        let worker_count = self.config.worker_count.max(1);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(workers = worker_count, "Starting worker pool");

        let mut tasks = self.tasks.lock().await;
        for i in 0..worker_count {
            let manager = manager.clone();
            let cancellation_token = self.cancellation_token.clone();
            let notifier = manager.notifier();

            tasks.spawn(async move {
                debug!(worker = i, "Worker started");
                loop {
                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }

                    while !cancellation_token.is_cancelled() {
                        let Some(entry) = manager.dequeue() else {
                            break;
                        };
                        if let Err(e) = manager.execute(entry).await {
                            error!(worker = i, error = %e, "Worker stopped by a job store fault");
                            return Err(e);
                        }
                    }
                }
                debug!(worker = i, "Worker shutting down");
                Ok(())
            });
        }
    }

    /// Wait until every worker has exited.
    ///
    /// Returns the first fatal error, after cancelling the remaining workers.
    pub async fn wait(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(Error::Other(format!("worker task failed: {e}"))),
            };
            if let Err(e) = outcome {
                self.cancellation_token.cancel();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop the workers.
    ///
    /// Steps in progress get `grace` to finish; after that they are aborted,
    /// which kills their subprocesses. Records left `processing` are failed
    /// as interrupted on the next start.
    pub async fn stop(&self, grace: Duration) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();
        let mut tasks = self.tasks.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(active = tasks.len(), "Aborting steps still running at shutdown");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        info!("Worker pool stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.grace_secs, 5);
    }

    #[test]
    fn test_budgets_order() {
        let budgets = StepBudgets::default();
        let transcribe = budgets.budget_for(StepKind::Transcribe);
        let export = budgets.budget_for(StepKind::ExportKaraoke);
        let preview = budgets.budget_for(StepKind::PreviewRender);
        assert!(transcribe > export && export > preview);
    }

    #[test]
    fn test_worker_pool_creation() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), CancellationToken::new());
        assert!(pool.is_running());
    }
}
