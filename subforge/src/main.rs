use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use subforge::api::{ApiServer, AppState};
use subforge::config::AppConfig;
use subforge::logging;
use subforge::pipeline::{
    InMemoryStepQueue, PipelineConfig, PipelineManager, RetentionSweeper, WorkerPool,
    default_processors,
};
use subforge::storage::{ArtifactStore, JobStore, SubtitleStore};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env_or_default();
    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("initializing logging")?;

    let cancel = CancellationToken::new();
    logging_config.start_retention_cleanup(cancel.clone());

    let artifacts = Arc::new(ArtifactStore::new(&config.data_dir));
    artifacts
        .ensure_layout()
        .await
        .context("creating data directories")?;
    let store = Arc::new(
        JobStore::open(artifacts.jobs_dir())
            .await
            .context("opening job store")?,
    );
    let subtitles = Arc::new(SubtitleStore::new(artifacts.clone()));
    let queue = Arc::new(InMemoryStepQueue::new(config.workers.queue_capacity));
    let processors = default_processors(&config.tools, &config.render, &config.storage);

    let manager = Arc::new(PipelineManager::new(
        PipelineConfig::new(&config.workers, &config.retention, &config.storage),
        store,
        artifacts,
        subtitles,
        queue,
        processors,
    ));
    manager.recover().await.context("recovering job records")?;

    let pool = WorkerPool::new(config.workers.clone(), cancel.child_token());
    pool.start(manager.clone()).await;

    Arc::new(RetentionSweeper::new(config.retention.clone(), manager.clone()))
        .start_background_task(cancel.clone());

    let state = AppState::new(manager)
        .with_logging_config(logging_config)
        .with_body_limit(config.api.body_limit);
    let server = ApiServer::new(config.api.clone(), state, cancel.clone());

    info!(data_dir = %config.data_dir.display(), "subforge started");

    let outcome = tokio::select! {
        result = server.run() => result.context("HTTP server failed"),
        result = pool.wait() => match result {
            Ok(()) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context("worker stopped on a job store fault")),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            Ok(())
        }
    };

    if let Err(e) = &outcome {
        error!(error = %format!("{e:#}"), "Shutting down after a fatal error");
    }
    cancel.cancel();
    pool.stop(Duration::from_secs(config.workers.grace_secs)).await;
    info!("subforge stopped");

    outcome
}
