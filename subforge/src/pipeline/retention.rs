//! Retention sweeper for expired jobs and storage pressure.
//!
//! Runs in the background and periodically removes jobs whose retention
//! window has passed, evicts the oldest finished jobs while storage is over
//! the cap, and cleans up artifacts that no record refers to.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::manager::PipelineManager;
use crate::domain::{JobRecord, JobStatus, RetentionWindow};
use crate::{Error, Result};

/// Configuration for job retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days an unpinned job is kept after its last access.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Days a pinned job is kept after its last access.
    #[serde(default = "default_pinned_retention_days")]
    pub pinned_retention_days: i64,

    /// Editor locks older than this are treated as released.
    #[serde(default = "default_lock_ttl_minutes")]
    pub lock_ttl_minutes: i64,

    /// Jobs deleted per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval between sweeps in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Status reads closer together than this do not rewrite the record.
    #[serde(default = "default_touch_coalesce_secs")]
    pub touch_coalesce_secs: u64,

    /// Storage cap the sweeper evicts down to.
    #[serde(default = "default_max_storage_bytes")]
    pub max_storage_bytes: u64,
}

fn default_retention_days() -> i64 {
    14
}

fn default_pinned_retention_days() -> i64 {
    30
}

fn default_lock_ttl_minutes() -> i64 {
    30
}

fn default_batch_size() -> usize {
    5
}

fn default_check_interval_secs() -> u64 {
    600 // 10 minutes
}

fn default_touch_coalesce_secs() -> u64 {
    5
}

fn default_max_storage_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            pinned_retention_days: default_pinned_retention_days(),
            lock_ttl_minutes: default_lock_ttl_minutes(),
            batch_size: default_batch_size(),
            check_interval_secs: default_check_interval_secs(),
            touch_coalesce_secs: default_touch_coalesce_secs(),
            max_storage_bytes: default_max_storage_bytes(),
        }
    }
}

impl RetentionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_pinned_retention_days(mut self, days: i64) -> Self {
        self.pinned_retention_days = days;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    pub fn with_max_storage_bytes(mut self, bytes: u64) -> Self {
        self.max_storage_bytes = bytes;
        self
    }

    pub fn window(&self) -> RetentionWindow {
        RetentionWindow::from_days(self.retention_days, self.pinned_retention_days)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lock_ttl_minutes)
    }
}

/// What one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
    pub orphans: usize,
    pub tombstones: usize,
    pub freed_bytes: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired + self.evicted + self.orphans + self.tombstones == 0
    }
}

/// Periodic cleanup of jobs and artifacts.
pub struct RetentionSweeper {
    config: RetentionConfig,
    manager: Arc<PipelineManager>,
}

impl RetentionSweeper {
    pub fn new(config: RetentionConfig, manager: Arc<PipelineManager>) -> Self {
        Self { config, manager }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Whether a job may be removed at `now`, ignoring its expiry.
    fn is_removable(&self, record: &JobRecord, now: DateTime<Utc>) -> bool {
        !record.tombstoned
            && !record.pinned
            && !record.is_lock_active(now, self.config.lock_ttl())
            && record.status != JobStatus::Processing
            && record.pending_steps.is_empty()
    }

    /// Run a single sweep.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        let mut expired: Vec<JobRecord> = self
            .manager
            .store()
            .snapshot()
            .into_iter()
            .filter(|r| r.expires_at <= now && self.is_removable(r, now))
            .collect();
        expired.sort_by_key(|r| r.last_accessed_at);

        for batch in expired.chunks(self.config.batch_size.max(1)) {
            for record in batch {
                if let Some(freed) = self.remove(record, |r| r.expires_at <= now).await? {
                    report.expired += 1;
                    report.freed_bytes += freed;
                }
            }
            tokio::task::yield_now().await;
        }

        self.relieve_pressure(now, &mut report).await?;
        self.remove_orphans(&mut report).await?;
        self.finish_tombstones(&mut report).await?;

        if report.is_empty() {
            debug!("Nothing to sweep");
        } else {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                orphans = report.orphans,
                tombstones = report.tombstones,
                freed_bytes = report.freed_bytes,
                "Retention sweep finished"
            );
        }
        Ok(report)
    }

    /// Tombstone and delete one job if it is still removable under its lock.
    ///
    /// Returns the bytes freed, or `None` when the job changed in between.
    async fn remove<F>(&self, record: &JobRecord, also: F) -> Result<Option<u64>>
    where
        F: Fn(&JobRecord) -> bool,
    {
        let now = Utc::now();
        let job_id = &record.job_id;
        let tombstoned = self
            .manager
            .store()
            .tombstone(job_id, |r| {
                if self.is_removable(r, now) && also(r) {
                    Ok(())
                } else {
                    Err(Error::invalid_transition(r.status, "deleted"))
                }
            })
            .await;

        let record = match tombstoned {
            Ok(record) => record,
            Err(Error::InvalidStateTransition { .. }) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let freed = self
            .manager
            .remove_job(job_id, &record.input.video_filename)
            .await?;
        debug!(job_id = %job_id, freed, "Removed job");
        Ok(Some(freed))
    }

    async fn relieve_pressure(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let limit = self.config.max_storage_bytes;
        let mut used = self.manager.artifacts().total_size().await?;
        if used <= limit {
            return Ok(());
        }
        warn!(used, limit, "Storage above cap; evicting oldest jobs");

        let mut candidates: Vec<JobRecord> = self
            .manager
            .store()
            .snapshot()
            .into_iter()
            .filter(|r| r.status.is_terminal() && self.is_removable(r, now))
            .collect();
        candidates.sort_by_key(|r| r.last_accessed_at);

        'batches: for batch in candidates.chunks(self.config.batch_size.max(1)) {
            for record in batch {
                if used <= limit {
                    break 'batches;
                }
                if let Some(freed) = self.remove(record, |r| r.status.is_terminal()).await? {
                    report.evicted += 1;
                    report.freed_bytes += freed;
                    used = used.saturating_sub(freed);
                }
            }
            tokio::task::yield_now().await;
        }

        if used > limit {
            warn!(used, limit, "Storage still above cap after eviction");
        }
        Ok(())
    }

    async fn remove_orphans(&self, report: &mut SweepReport) -> Result<()> {
        let known: HashSet<String> = self
            .manager
            .store()
            .snapshot()
            .into_iter()
            .map(|r| r.job_id.to_string())
            .collect();

        let artifacts = self.manager.artifacts();
        for path in artifacts.find_orphans(&known).await? {
            match artifacts.remove_orphan(&path).await {
                Ok(freed) => {
                    debug!(path = %path.display(), freed, "Removed orphaned artifact");
                    report.orphans += 1;
                    report.freed_bytes += freed;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphan"),
            }
        }
        Ok(())
    }

    async fn finish_tombstones(&self, report: &mut SweepReport) -> Result<()> {
        for record in self.manager.store().snapshot() {
            if !record.tombstoned {
                continue;
            }
            let freed = self
                .manager
                .remove_job(&record.job_id, &record.input.video_filename)
                .await?;
            report.tombstones += 1;
            report.freed_bytes += freed;
        }
        Ok(())
    }

    /// Start the background sweep task.
    pub fn start_background_task(self: Arc<Self>, cancellation_token: CancellationToken) {
        tokio::spawn(async move {
            let mut check_interval = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));

            info!(
                retention_days = self.config.retention_days,
                pinned_retention_days = self.config.pinned_retention_days,
                interval_secs = self.config.check_interval_secs,
                "Retention sweeper started"
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Retention sweeper shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = self.run_sweep().await {
                            error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_config_default() {
        let config = RetentionConfig::default();
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.pinned_retention_days, 30);
        assert_eq!(config.lock_ttl_minutes, 30);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_storage_bytes, 20 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_retention_config_builder() {
        let config = RetentionConfig::new()
            .with_retention_days(7)
            .with_batch_size(2)
            .with_check_interval_secs(60)
            .with_max_storage_bytes(1024);

        assert_eq!(config.retention_days, 7);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.max_storage_bytes, 1024);
        assert_eq!(config.lock_ttl(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_window_uses_both_durations() {
        let window = RetentionConfig::new()
            .with_retention_days(1)
            .with_pinned_retention_days(2)
            .window();
        let now = Utc::now();
        assert_eq!(window.expiry(now, false), now + chrono::Duration::days(1));
        assert_eq!(window.expiry(now, true), now + chrono::Duration::days(2));
    }
}
