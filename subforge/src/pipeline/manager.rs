//! Pipeline manager: the single entry point for job lifecycle operations.
//!
//! Request handlers call into the manager to create projects, enqueue steps
//! and read status; worker loops call [`PipelineManager::execute`] for every
//! dequeued step. All record changes go through [`JobStore::update`], so each
//! transition is one atomic write under the job's record lock. Step execution
//! additionally holds a per-job execution lock, which keeps the steps of one
//! job strictly sequential no matter how many workers run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::job_queue::{QueueEntry, StepQueue, TicketSequence};
use super::processors::{Processor, StepContext, StepError, resync_words_to_blocks};
use super::retention::RetentionConfig;
use super::worker_pool::{StepBudgets, WorkerPoolConfig};
use crate::domain::subtitle::{StyleConfig, SubtitleBlock, SubtitleDocument, parse_srt};
use crate::domain::{JobId, JobInput, JobRecord, JobStatus, RetentionWindow, StepKind, Ticket};
use crate::storage::{ArtifactStore, JobFilter, JobLog, JobStore, StorageConfig, SubtitleStore};
use crate::utils::fs::{self, io_error};
use crate::{Error, Result};

/// Settings the manager applies to every job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retention: RetentionWindow,
    /// Editor locks older than this no longer protect a job.
    pub lock_ttl: chrono::Duration,
    /// Status reads within this long of the previous access are not persisted.
    pub touch_coalesce: chrono::Duration,
    pub budgets: StepBudgets,
    /// Extra time past the budget before the worker abandons a step.
    pub grace: Duration,
    pub storage: StorageConfig,
}

impl PipelineConfig {
    pub fn new(workers: &WorkerPoolConfig, retention: &RetentionConfig, storage: &StorageConfig) -> Self {
        Self {
            retention: retention.window(),
            lock_ttl: retention.lock_ttl(),
            touch_coalesce: chrono::Duration::seconds(retention.touch_coalesce_secs as i64),
            budgets: workers.budgets.clone(),
            grace: Duration::from_secs(workers.grace_secs),
            storage: storage.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(
            &WorkerPoolConfig::default(),
            &RetentionConfig::default(),
            &StorageConfig::default(),
        )
    }
}

/// Metadata of an upload that is about to be stored.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub owner: Option<String>,
    pub title: Option<String>,
    pub original_filename: String,
    pub language: Option<String>,
}

/// Edited subtitles submitted by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleUpdate {
    pub subtitles: Vec<SubtitleBlock>,
    #[serde(default)]
    pub style: Option<StyleConfig>,
}

/// What [`PipelineManager::recover`] did at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub interrupted: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub purged: usize,
}

/// How the start bookend of a step ended.
enum Begin {
    Run(JobRecord),
    Skip,
    /// A manual retry or an older step of the job comes first; try again after it.
    Defer,
}

pub struct PipelineManager {
    config: PipelineConfig,
    store: Arc<JobStore>,
    artifacts: Arc<ArtifactStore>,
    subtitles: Arc<SubtitleStore>,
    queue: Arc<dyn StepQueue>,
    tickets: TicketSequence,
    processors: Vec<Arc<dyn Processor>>,
    exec_locks: DashMap<JobId, Arc<Mutex<()>>>,
}

/// Errors that mean the job store itself is unusable.
fn is_store_fault(error: &Error) -> bool {
    matches!(
        error,
        Error::Io(_) | Error::IoPath { .. } | Error::Serialization(_)
    )
}

impl PipelineManager {
    pub fn new(
        config: PipelineConfig,
        store: Arc<JobStore>,
        artifacts: Arc<ArtifactStore>,
        subtitles: Arc<SubtitleStore>,
        queue: Arc<dyn StepQueue>,
        processors: Vec<Arc<dyn Processor>>,
    ) -> Self {
        Self {
            config,
            store,
            artifacts,
            subtitles,
            queue,
            tickets: TicketSequence::new(),
            processors,
            exec_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn subtitles(&self) -> &Arc<SubtitleStore> {
        &self.subtitles
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.queue.notifier()
    }

    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.queue.try_pop()
    }

    fn exec_lock(&self, job_id: &JobId) -> Arc<Mutex<()>> {
        self.exec_locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a job on behalf of `owner`.
    ///
    /// A record without an owner is claimed by the first caller that has one.
    pub async fn authorize(&self, job_id: &JobId, owner: Option<&str>) -> Result<JobRecord> {
        let record = self.store.get(job_id)?;
        if record.owner.is_none()
            && let Some(caller) = owner
        {
            let (record, ()) = self
                .store
                .update(job_id, |r| {
                    if r.owner.is_none() {
                        r.owner = Some(caller.to_string());
                    }
                    Ok(())
                })
                .await?;
            info!(job_id = %job_id, "Unowned job claimed by caller");
            return self.check_owner(record, owner);
        }
        self.check_owner(record, owner)
    }

    fn check_owner(&self, record: JobRecord, owner: Option<&str>) -> Result<JobRecord> {
        if record.is_owned_by(owner) {
            Ok(record)
        } else {
            Err(Error::Forbidden(format!(
                "Job {} belongs to another session",
                record.job_id
            )))
        }
    }

    /// Store an upload, create its job and enqueue transcription.
    pub async fn create_project<S, E>(&self, project: NewProject, body: S) -> Result<(JobRecord, Ticket)>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: std::fmt::Display + Send,
    {
        let storage = &self.config.storage;
        let ext = storage
            .accepted_extension(&project.original_filename)
            .ok_or_else(|| {
                Error::validation(format!(
                    "Unsupported file type; allowed: {}",
                    storage.allowed_extensions.join(", ")
                ))
            })?;

        let used = self.artifacts.total_size().await?;
        if used >= storage.max_storage_bytes {
            return Err(Error::StorageFull {
                used,
                limit: storage.max_storage_bytes,
            });
        }

        let job_id = JobId::generate();
        let video_filename = ArtifactStore::upload_file_name(&job_id, &ext);
        let target = self.artifacts.upload_path(&video_filename);
        let partial = self
            .artifacts
            .uploads_dir()
            .join(format!("{video_filename}.partial"));

        let size = match self.receive_upload(body, &partial).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file_if_exists(&partial).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| io_error("storing upload", &target, e))?;

        let title = project
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                Path::new(&project.original_filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Untitled".to_string())
            });
        let record = JobRecord::new(
            job_id.clone(),
            project.owner,
            title.trim(),
            JobInput {
                video_filename: video_filename.clone(),
                original_filename: project.original_filename,
                language: project.language.filter(|l| !l.trim().is_empty()),
            },
            Utc::now(),
            &self.config.retention,
        );
        self.store.create(record).await?;

        let ticket = match self.enqueue(&job_id, StepKind::Transcribe).await {
            Ok(ticket) => ticket,
            Err(e) => {
                // A project that can never be transcribed is useless; drop it.
                warn!(job_id = %job_id, error = %e, "Could not enqueue transcription; removing upload");
                self.remove_job(&job_id, &video_filename).await?;
                return Err(e);
            }
        };

        info!(job_id = %job_id, size, ticket, "Project created");
        Ok((self.store.get(&job_id)?, ticket))
    }

    async fn receive_upload<S, E>(&self, body: S, partial: &Path) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send,
        E: std::fmt::Display + Send,
    {
        let limit = self.config.storage.max_upload_bytes;
        let mut body = std::pin::pin!(body);
        let mut file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| io_error("creating upload", partial, e))?;

        let mut size = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::validation(format!("Upload interrupted: {e}")))?;
            size += chunk.len() as u64;
            if size > limit {
                return Err(Error::validation(format!(
                    "The upload exceeds the {} MiB limit",
                    limit / (1024 * 1024)
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error("writing upload", partial, e))?;
        }
        file.sync_all()
            .await
            .map_err(|e| io_error("writing upload", partial, e))?;

        if size == 0 {
            return Err(Error::validation("The uploaded file is empty"));
        }
        Ok(size)
    }

    /// Enqueue `step` for a job and return its ticket.
    ///
    /// The pending step is persisted before it becomes visible to workers. If
    /// the queue is full the record is restored and the error returned.
    pub async fn enqueue(&self, job_id: &JobId, step: StepKind) -> Result<Ticket> {
        let ticket = self.tickets.next();
        let now = Utc::now();
        self.store
            .update(job_id, |r| r.enqueue_step(step, ticket, now))
            .await?;

        if let Err(e) = self.queue.push(QueueEntry::new(job_id.clone(), step, ticket)) {
            warn!(job_id = %job_id, step = %step, ticket, error = %e, "Step rejected by the queue");
            if let Err(revert) = self
                .store
                .update(job_id, |r| {
                    r.drop_pending(ticket);
                    Ok(())
                })
                .await
            {
                error!(job_id = %job_id, error = %revert, "Failed to revert rejected step");
            }
            return Err(e);
        }

        debug!(job_id = %job_id, step = %step, ticket, "Step enqueued");
        Ok(ticket)
    }

    /// Enqueue an export. A pending export of the same kind is reused.
    pub async fn request_export(&self, job_id: &JobId, owner: Option<&str>, karaoke: bool) -> Result<Ticket> {
        let record = self.authorize(job_id, owner).await?;
        let step = if karaoke {
            StepKind::ExportKaraoke
        } else {
            StepKind::ExportStandard
        };
        if let Some(pending) = record.pending_steps.iter().find(|p| p.step == step) {
            debug!(job_id = %job_id, step = %step, ticket = pending.ticket, "Export already pending");
            return Ok(pending.ticket);
        }
        self.enqueue(job_id, step).await
    }

    /// Re-run the failed step of a job.
    ///
    /// Only valid from `failed`; anything else is a conflict and leaves the
    /// record untouched. The step goes to the head of the queue.
    pub async fn retry(&self, job_id: &JobId, owner: Option<&str>) -> Result<Ticket> {
        self.authorize(job_id, owner).await?;
        let ticket = self.tickets.next();
        let now = Utc::now();
        let (_, step) = self
            .store
            .update(job_id, |r| r.begin_retry(ticket, now))
            .await?;

        self.queue
            .push_front(QueueEntry::retry(job_id.clone(), step, ticket));
        info!(job_id = %job_id, step = %step, ticket, "Manual retry queued");
        Ok(ticket)
    }

    /// Save edited subtitles, release the editor lock and queue a preview.
    pub async fn save_subtitles(
        &self,
        job_id: &JobId,
        owner: Option<&str>,
        update: SubtitleUpdate,
    ) -> Result<(SubtitleDocument, Ticket)> {
        self.authorize(job_id, owner).await?;

        let mut document = self.subtitles.load(job_id).await?;
        document.subtitles = update.subtitles;
        if let Some(style) = update.style {
            document.style = style;
        }
        let document = self.subtitles.save(job_id, document).await?;

        let mut words = self.subtitles.load_words(job_id).await;
        if !words.is_empty() {
            resync_words_to_blocks(&mut words, &document.sorted_blocks());
            self.subtitles.save_words(job_id, &words).await?;
        }

        let now = Utc::now();
        let retention = self.config.retention;
        self.store
            .update(job_id, |r| {
                r.set_locked(false, now);
                r.touch(now, &retention);
                Ok(())
            })
            .await?;

        let ticket = self.enqueue(job_id, StepKind::PreviewRender).await?;
        info!(
            job_id = %job_id,
            revision = document.revision,
            blocks = document.subtitles.len(),
            ticket,
            "Subtitles saved"
        );
        Ok((document, ticket))
    }

    /// Replace the subtitle blocks with the cues of an SRT file.
    pub async fn import_srt(
        &self,
        job_id: &JobId,
        owner: Option<&str>,
        srt: &str,
    ) -> Result<(SubtitleDocument, Ticket)> {
        let subtitles = parse_srt(srt)?;
        self.save_subtitles(
            job_id,
            owner,
            SubtitleUpdate {
                subtitles,
                style: None,
            },
        )
        .await
    }

    /// Subtitle document of a job, for the editor.
    pub async fn load_subtitles(&self, job_id: &JobId, owner: Option<&str>) -> Result<SubtitleDocument> {
        self.authorize(job_id, owner).await?;
        self.subtitles.load(job_id).await
    }

    /// Current record of a job. Records the access unless one was recorded
    /// very recently.
    pub async fn get_status(&self, job_id: &JobId, owner: Option<&str>) -> Result<JobRecord> {
        let record = self.authorize(job_id, owner).await?;
        let now = Utc::now();
        if now - record.last_accessed_at < self.config.touch_coalesce {
            return Ok(record);
        }
        let retention = self.config.retention;
        let (record, ()) = self
            .store
            .update(job_id, |r| {
                r.touch(now, &retention);
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// Record an access, optionally taking or releasing the editor lock.
    pub async fn touch(&self, job_id: &JobId, owner: Option<&str>, locked: Option<bool>) -> Result<JobRecord> {
        self.authorize(job_id, owner).await?;
        let now = Utc::now();
        let retention = self.config.retention;
        let (record, ()) = self
            .store
            .update(job_id, |r| {
                r.touch(now, &retention);
                if let Some(locked) = locked {
                    r.set_locked(locked, now);
                }
                Ok(())
            })
            .await?;
        Ok(record)
    }

    pub async fn set_pinned(&self, job_id: &JobId, owner: Option<&str>, pinned: bool) -> Result<JobRecord> {
        self.authorize(job_id, owner).await?;
        let retention = self.config.retention;
        let (record, ()) = self
            .store
            .update(job_id, |r| {
                r.set_pinned(pinned, &retention);
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// Delete a job on request of its owner.
    ///
    /// Refused while a step is running or an editor holds the lock.
    pub async fn delete(&self, job_id: &JobId, owner: Option<&str>) -> Result<()> {
        self.authorize(job_id, owner).await?;
        let now = Utc::now();
        let ttl = self.config.lock_ttl;
        let record = self
            .store
            .tombstone(job_id, |r| {
                if r.status == JobStatus::Processing {
                    return Err(Error::invalid_transition(r.status, "deleted"));
                }
                if r.is_lock_active(now, ttl) {
                    return Err(Error::invalid_transition("locked", "deleted"));
                }
                Ok(())
            })
            .await?;
        self.remove_job(job_id, &record.input.video_filename).await?;
        info!(job_id = %job_id, "Job deleted by owner");
        Ok(())
    }

    /// Remove the artifacts and the record of a tombstoned (or never
    /// published) job. Returns the bytes freed.
    pub(crate) async fn remove_job(&self, job_id: &JobId, video_filename: &str) -> Result<u64> {
        let freed = self.artifacts.delete_job(job_id, video_filename).await?;
        self.subtitles.forget(job_id);
        self.store.delete(job_id).await?;
        self.exec_locks.remove(job_id);
        Ok(freed)
    }

    /// Most recently accessed jobs of `owner`.
    pub fn list_recent(&self, owner: Option<&str>) -> Vec<JobRecord> {
        let Some(owner) = owner else {
            return Vec::new();
        };
        self.store
            .list(&JobFilter::owned_by(owner).with_limit(self.config.storage.recent_limit))
    }

    /// Bring records and the queue back in line after a restart.
    ///
    /// Steps that were running are failed as interrupted, pending steps are
    /// re-queued in ticket order and half-finished deletions are completed.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let now = Utc::now();
        let mut pending = Vec::new();

        for record in self.store.snapshot() {
            self.tickets.observe(record.max_ticket());
            let job_id = record.job_id.clone();

            if record.tombstoned {
                self.remove_job(&job_id, &record.input.video_filename).await?;
                report.purged += 1;
                continue;
            }

            let record = if record.status == JobStatus::Processing {
                let (record, _) = self
                    .store
                    .update(&job_id, |r| Ok(r.interrupt_in_flight(now)))
                    .await?;
                warn!(job_id = %job_id, step = ?record.failed_step, "Step interrupted by restart");
                report.interrupted += 1;
                record
            } else {
                record
            };

            pending.extend(
                record
                    .pending_steps
                    .iter()
                    .map(|p| QueueEntry::new(job_id.clone(), p.step, p.ticket)),
            );
        }

        pending.sort_by_key(|e| e.ticket);
        for entry in pending {
            let (job_id, ticket) = (entry.job_id.clone(), entry.ticket);
            match self.queue.push(entry) {
                Ok(()) => report.requeued += 1,
                Err(e) => {
                    warn!(job_id = %job_id, ticket, error = %e, "Dropping pending step during recovery");
                    self.store
                        .update(&job_id, |r| {
                            r.drop_pending(ticket);
                            Ok(())
                        })
                        .await?;
                    report.dropped += 1;
                }
            }
        }

        info!(
            interrupted = report.interrupted,
            requeued = report.requeued,
            dropped = report.dropped,
            purged = report.purged,
            "Recovered job records"
        );
        Ok(report)
    }

    /// Run one dequeued step to completion.
    ///
    /// Step failures are recorded on the job. An error is returned only when
    /// the job store cannot be written, which the worker treats as fatal.
    pub async fn execute(&self, entry: QueueEntry) -> Result<()> {
        let QueueEntry {
            job_id,
            step,
            ticket,
            retry,
        } = entry;
        let lock = self.exec_lock(&job_id);
        let guard = lock.lock().await;

        let record = match self.begin(&job_id, step, ticket, retry).await {
            Ok(Begin::Run(record)) => record,
            Ok(Begin::Skip) => return Ok(()),
            Ok(Begin::Defer) => {
                drop(guard);
                self.requeue(QueueEntry::new(job_id, step, ticket)).await?;
                return Ok(());
            }
            Err(e) if is_store_fault(&e) => return Err(e),
            Err(e) => {
                debug!(job_id = %job_id, step = %step, ticket, error = %e, "Skipping step");
                return Ok(());
            }
        };

        let log = JobLog::new(self.artifacts.log_path(&job_id));
        log.section(step, ticket).await;
        let result = self.run_step(record, step, ticket, log.clone()).await;

        let now = Utc::now();
        let finished = match result {
            Ok(output) => {
                let follow_up = output.follow_up;
                let published = output.output;
                self.store
                    .update(&job_id, |r| {
                        if r.is_superseded(step, ticket) {
                            r.supersede_step(ticket, now)?;
                            return Ok(false);
                        }
                        r.complete_step(ticket, published, now)?;
                        Ok(true)
                    })
                    .await
                    .map(|(_, completed)| {
                        if completed {
                            info!(job_id = %job_id, step = %step, ticket, "Step completed");
                            follow_up
                        } else {
                            info!(job_id = %job_id, step = %step, ticket, "Step superseded by a newer request");
                            Vec::new()
                        }
                    })
            }
            Err(err) => {
                let classified = err.classify();
                log.note(format!("failed: {err}")).await;
                warn!(
                    job_id = %job_id,
                    step = %step,
                    ticket,
                    code = %classified.code,
                    error = %err,
                    "Step failed"
                );
                self.store
                    .update(&job_id, |r| {
                        if r.is_superseded(step, ticket) {
                            r.supersede_step(ticket, now)
                        } else {
                            r.fail_step(ticket, classified, now)
                        }
                    })
                    .await
                    .map(|_| Vec::new())
            }
        };

        let follow_up = match finished {
            Ok(follow_up) => follow_up,
            Err(e) if is_store_fault(&e) => return Err(e),
            Err(e) => {
                warn!(job_id = %job_id, step = %step, ticket, error = %e, "Could not record step result");
                return Ok(());
            }
        };

        for next in follow_up {
            if let Err(e) = self.enqueue(&job_id, next).await {
                if is_store_fault(&e) {
                    return Err(e);
                }
                warn!(job_id = %job_id, step = %next, error = %e, "Could not enqueue follow-up step");
            }
        }
        Ok(())
    }

    async fn begin(&self, job_id: &JobId, step: StepKind, ticket: Ticket, retry: bool) -> Result<Begin> {
        if retry {
            // The retry already opened its timeline entry.
            let record = self.store.get(job_id)?;
            let open = record
                .step_timeline
                .iter()
                .any(|e| e.ticket == ticket && e.is_open());
            return Ok(if open && record.status == JobStatus::Processing {
                Begin::Run(record)
            } else {
                Begin::Skip
            });
        }

        let now = Utc::now();
        let (_, begin) = self
            .store
            .update(job_id, |r| {
                if !r.pending_steps.iter().any(|p| p.ticket == ticket) {
                    return Ok(Begin::Skip);
                }
                if r.status == JobStatus::Processing {
                    return Ok(Begin::Defer);
                }
                if r.is_superseded(step, ticket) {
                    r.drop_pending(ticket);
                    debug!(job_id = %r.job_id, step = %step, ticket, "Dropped superseded step");
                    return Ok(Begin::Skip);
                }
                // Another worker holds an older entry for this job.
                if r.has_earlier_pending(ticket) {
                    return Ok(Begin::Defer);
                }
                r.begin_step(step, ticket, now)?;
                Ok(Begin::Run(r.clone()))
            })
            .await?;

        if let Begin::Run(_) = begin {
            debug!(job_id = %job_id, step = %step, ticket, "Step started");
        }
        Ok(begin)
    }

    /// Put a step that could not start yet back at the tail of the queue.
    async fn requeue(&self, entry: QueueEntry) -> Result<()> {
        let (job_id, ticket) = (entry.job_id.clone(), entry.ticket);
        if let Err(e) = self.queue.push(entry) {
            warn!(job_id = %job_id, ticket, error = %e, "Dropping step that could not be requeued");
            match self
                .store
                .update(&job_id, |r| {
                    r.drop_pending(ticket);
                    Ok(())
                })
                .await
            {
                Err(e) if is_store_fault(&e) => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        record: JobRecord,
        step: StepKind,
        ticket: Ticket,
        log: JobLog,
    ) -> std::result::Result<super::processors::ProcessorOutput, StepError> {
        let Some(processor) = self.processors.iter().find(|p| p.can_process(step)) else {
            return Err(StepError::dependency(step.to_string(), "no processor is configured"));
        };

        let budget = self.config.budgets.budget_for(step);
        let ctx = StepContext {
            job: record,
            step,
            ticket,
            deadline: tokio::time::Instant::now() + budget,
            budget,
            artifacts: self.artifacts.clone(),
            subtitles: self.subtitles.clone(),
            log,
        };

        debug!(job_id = %ctx.job_id(), step = %step, processor = processor.name(), "Running processor");
        // Backstop for processors that overrun without a subprocess to kill.
        match tokio::time::timeout(budget + self.config.grace, processor.process(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ctx.timed_out()),
        }
    }
}
