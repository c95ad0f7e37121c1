#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::Notify;

use subforge::domain::subtitle::{StyleConfig, SubtitleBlock, SubtitleDocument, Timestamp, Word};
use subforge::domain::{ErrorKind, JobId, JobRecord, StepKind, Ticket};
use subforge::pipeline::processors::utils::{ensure_success, run_tool};
use subforge::pipeline::{
    InMemoryStepQueue, NewProject, PipelineConfig, PipelineManager, Processor, ProcessorOutput,
    RetentionConfig, StepBudgets, StepContext, StepError, WorkerPoolConfig,
};
use subforge::storage::{ArtifactKind, ArtifactStore, JobStore, StorageConfig, SubtitleStore};

/// What a scripted processor does when called.
#[derive(Clone)]
pub enum Behavior {
    Succeed,
    /// Fail with the given kind on the first call, succeed afterwards.
    FailFirst(ErrorKind),
    /// Run `sleep` for this many seconds as a subprocess.
    Subprocess(u64),
    /// Run a `sh -c` script as the step's tool; a non-zero exit fails the step.
    Shell(String),
    /// Never finish without help from the worker's backstop.
    Hang,
    /// Wait for the gate before succeeding.
    Gate(Arc<Notify>),
}

pub struct ScriptedProcessor {
    steps: &'static [StepKind],
    behavior: Behavior,
    pub calls: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn new(steps: &'static [StepKind], behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            steps,
            behavior,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn succeed(&self, ctx: &StepContext) -> Result<ProcessorOutput, StepError> {
        let job_id = ctx.job_id();
        if ctx.step == StepKind::Transcribe {
            ctx.subtitles.save(job_id, sample_document(&ctx.job)).await?;
            ctx.subtitles.save_words(job_id, &sample_words()).await?;
            return Ok(ProcessorOutput {
                output: subforge::domain::JobOutput {
                    step: Some(ctx.step),
                    ticket: ctx.ticket,
                    subtitle_url: Some(ctx.artifacts.url(job_id, ArtifactKind::Srt, Some(ctx.ticket))),
                    ..Default::default()
                },
                duration_secs: 0.0,
                follow_up: vec![StepKind::PreviewRender],
            });
        }

        let video = match ctx.step {
            StepKind::ExportStandard => ArtifactKind::StandardVideo,
            StepKind::ExportKaraoke => ArtifactKind::KaraokeVideo,
            _ => ArtifactKind::PreviewVideo,
        };
        let path = ctx.artifacts.path(job_id, video);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, format!("render {}", ctx.ticket)).await.unwrap();

        Ok(ProcessorOutput {
            output: subforge::domain::JobOutput {
                step: Some(ctx.step),
                ticket: ctx.ticket,
                video_url: Some(ctx.artifacts.url(job_id, video, Some(ctx.ticket))),
                ..Default::default()
            },
            duration_secs: 0.0,
            follow_up: Vec::new(),
        })
    }
}

#[async_trait]
impl Processor for ScriptedProcessor {
    fn steps(&self) -> &'static [StepKind] {
        self.steps
    }

    async fn process(&self, ctx: &StepContext) -> Result<ProcessorOutput, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => self.succeed(ctx).await,
            Behavior::FailFirst(kind) if call == 0 => Err(match kind {
                ErrorKind::InputInvalid => StepError::input_invalid("The uploaded file is not a video."),
                ErrorKind::NotFound => StepError::NotFound("gone".into()),
                _ => StepError::dependency("encoder", "exit status 1"),
            }),
            Behavior::FailFirst(_) => self.succeed(ctx).await,
            Behavior::Subprocess(secs) => {
                let mut command = tokio::process::Command::new("sleep");
                command.arg(secs.to_string());
                let run = run_tool(ctx, "sleep", &mut command).await?;
                assert!(run.status.success());
                self.succeed(ctx).await
            }
            Behavior::Shell(script) => {
                let mut command = tokio::process::Command::new("sh");
                command.arg("-c").arg(script);
                let run = run_tool(ctx, "sh", &mut command).await?;
                ensure_success("sh", &run)?;
                self.succeed(ctx).await
            }
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                self.succeed(ctx).await
            }
            Behavior::Gate(gate) => {
                gate.notified().await;
                self.succeed(ctx).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "ScriptedProcessor"
    }
}

pub const TRANSCRIBE: &[StepKind] = &[StepKind::Transcribe];
pub const RENDERS: &[StepKind] = &[
    StepKind::PreviewRender,
    StepKind::ExportStandard,
    StepKind::ExportKaraoke,
];

pub fn sample_document(job: &JobRecord) -> SubtitleDocument {
    SubtitleDocument {
        title: job.title.clone(),
        video_filename: job.input.video_filename.clone(),
        subtitles: vec![
            SubtitleBlock::new(Timestamp::from_millis(0), Timestamp::from_millis(1_000), "hello world"),
            SubtitleBlock::new(Timestamp::from_millis(1_000), Timestamp::from_millis(2_500), "second line"),
        ],
        style: StyleConfig::default(),
        video_size: None,
        revision: 0,
    }
}

pub fn sample_words() -> Vec<Word> {
    [("hello", 0.0, 0.4), ("world", 0.5, 0.9), ("second", 1.0, 1.6), ("line", 1.7, 2.4)]
        .into_iter()
        .map(|(text, start, end)| Word {
            start,
            end,
            text: text.to_string(),
        })
        .collect()
}

pub struct Harness {
    pub dir: TempDir,
    pub manager: Arc<PipelineManager>,
    pub workers: WorkerPoolConfig,
}

impl Harness {
    pub async fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self::with_workers(processors, WorkerPoolConfig::default()).await
    }

    pub async fn with_workers(processors: Vec<Arc<dyn Processor>>, workers: WorkerPoolConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, processors, &workers).await;
        Self {
            dir,
            manager,
            workers,
        }
    }

    /// A fresh manager over the same data directory, as after a restart.
    pub async fn restart(&mut self, processors: Vec<Arc<dyn Processor>>) {
        self.manager = build_manager(&self.dir, processors, &self.workers).await;
    }

    pub async fn upload(&self, owner: &str) -> (JobId, Ticket) {
        let project = NewProject {
            owner: Some(owner.to_string()),
            title: Some("Holiday clip".to_string()),
            original_filename: "holiday.mp4".to_string(),
            language: None,
        };
        let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(
            b"not really a video",
        ))]);
        let (record, ticket) = self.manager.create_project(project, body).await.unwrap();
        (record.job_id, ticket)
    }

    /// Run queued steps until the queue is empty.
    pub async fn drain(&self) -> usize {
        let mut executed = 0;
        while let Some(entry) = self.manager.dequeue() {
            self.manager.execute(entry).await.unwrap();
            executed += 1;
        }
        executed
    }

    pub fn record(&self, job_id: &JobId) -> JobRecord {
        self.manager.store().get(job_id).unwrap()
    }

    pub fn record_file(&self, job_id: &JobId) -> Vec<u8> {
        std::fs::read(self.manager.artifacts().jobs_dir().join(format!("{job_id}.json"))).unwrap()
    }
}

async fn build_manager(
    dir: &TempDir,
    processors: Vec<Arc<dyn Processor>>,
    workers: &WorkerPoolConfig,
) -> Arc<PipelineManager> {
    let artifacts = Arc::new(ArtifactStore::new(dir.path()));
    artifacts.ensure_layout().await.unwrap();
    let store = Arc::new(JobStore::open(artifacts.jobs_dir()).await.unwrap());
    let subtitles = Arc::new(SubtitleStore::new(artifacts.clone()));
    let queue = Arc::new(InMemoryStepQueue::new(workers.queue_capacity));
    let config = PipelineConfig::new(workers, &RetentionConfig::default(), &StorageConfig::default());
    Arc::new(PipelineManager::new(
        config, store, artifacts, subtitles, queue, processors,
    ))
}

pub fn short_budgets(secs: u64) -> WorkerPoolConfig {
    WorkerPoolConfig::default()
        .with_budgets(StepBudgets {
            transcribe_secs: secs,
            preview_secs: secs,
            export_secs: secs,
        })
        .with_grace_secs(1)
}
