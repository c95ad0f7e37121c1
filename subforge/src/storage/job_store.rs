//! File-backed job record store.
//!
//! One JSON document per job under `jobs/`. Every write replaces the document
//! atomically, and all mutations of one job are serialized by a per-job lock.
//! Records are cached in memory after they have been durably written, so reads
//! never touch the disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{JobId, JobRecord, JobStatus};
use crate::utils::fs::{self, io_error};
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner: Option<String>,
    pub statuses: Option<Vec<JobStatus>>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &JobRecord) -> bool {
        if record.tombstoned {
            return false;
        }
        if let Some(owner) = &self.owner
            && record.owner.as_deref() != Some(owner.as_str())
        {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&record.status)
        {
            return false;
        }
        true
    }
}

pub struct JobStore {
    dir: PathBuf,
    cache: DashMap<JobId, JobRecord>,
    locks: DashMap<JobId, Arc<Mutex<()>>>,
}

impl JobStore {
    /// Open the store, loading every record found in `dir`.
    ///
    /// Unreadable documents are skipped with a warning; leftover temp files
    /// from interrupted writes are removed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::ensure_dir_all_with_op("creating jobs directory", &dir).await?;

        let store = Self {
            dir,
            cache: DashMap::new(),
            locks: DashMap::new(),
        };

        let mut entries = tokio::fs::read_dir(&store.dir)
            .await
            .map_err(|e| io_error("listing job records", &store.dir, e))?;
        let mut loaded = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing job records", &store.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if name.starts_with(".tmp-") {
                debug!(path = %path.display(), "Removing stale temp file");
                let _ = fs::remove_file_if_exists(&path).await;
                continue;
            }
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(job_id) = JobId::parse(stem) else {
                warn!(file = %name, "Ignoring unexpected file in jobs directory");
                continue;
            };

            let record: Option<JobRecord> =
                json::read_json_file_or_warn(&path, JsonContext::JobRecord { job_id: stem }).await;
            match record {
                Some(record) if record.job_id == job_id => {
                    store.cache.insert(job_id, record);
                    loaded += 1;
                }
                Some(_) => warn!(file = %name, "Job record id does not match its file name"),
                None => {}
            }
        }

        info!(count = loaded, dir = %store.dir.display(), "Loaded job records");
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn lock_for(&self, job_id: &JobId) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn persist(&self, record: &JobRecord) -> Result<()> {
        json::write_json_atomic(&self.record_path(&record.job_id), record).await
    }

    /// Persist a new record. Fails if the id is already taken.
    pub async fn create(&self, record: JobRecord) -> Result<JobId> {
        let job_id = record.job_id.clone();
        let lock = self.lock_for(&job_id);
        let _guard = lock.lock().await;

        if self.cache.contains_key(&job_id) {
            return Err(Error::validation(format!("Job {job_id} already exists")));
        }
        self.persist(&record).await?;
        self.cache.insert(job_id.clone(), record);
        debug!(job_id = %job_id, "Created job record");
        Ok(job_id)
    }

    /// Current durable state of a job.
    pub fn get(&self, job_id: &JobId) -> Result<JobRecord> {
        match self.cache.get(job_id) {
            Some(record) if !record.tombstoned => Ok(record.clone()),
            _ => Err(Error::not_found("Job", job_id.as_str())),
        }
    }

    /// Apply `mutator` under the job's exclusive lock and persist the result.
    ///
    /// The mutator works on a copy; when it returns an error nothing is
    /// written and the stored record is unchanged. Returns the new record and
    /// the mutator's value.
    pub async fn update<F, R>(&self, job_id: &JobId, mutator: F) -> Result<(JobRecord, R)>
    where
        F: FnOnce(&mut JobRecord) -> Result<R>,
    {
        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let mut record = match self.cache.get(job_id) {
            Some(record) if !record.tombstoned => record.clone(),
            _ => return Err(Error::not_found("Job", job_id.as_str())),
        };
        let value = mutator(&mut record)?;

        self.persist(&record).await?;
        self.cache.insert(job_id.clone(), record.clone());
        Ok((record, value))
    }

    /// Mark a job as being deleted after `check` approves it.
    ///
    /// From here on the job reads as not found. The record file stays until
    /// [`delete`](Self::delete) so an interrupted deletion can be finished.
    pub async fn tombstone<F>(&self, job_id: &JobId, check: F) -> Result<JobRecord>
    where
        F: FnOnce(&JobRecord) -> Result<()>,
    {
        let (record, ()) = self
            .update(job_id, |record| {
                check(record)?;
                record.tombstoned = true;
                Ok(())
            })
            .await?;
        Ok(record)
    }

    /// Remove a record file. Deleting an unknown job is not an error.
    pub async fn delete(&self, job_id: &JobId) -> Result<()> {
        let lock = self.lock_for(job_id);
        {
            let _guard = lock.lock().await;
            fs::remove_file_if_exists(&self.record_path(job_id)).await?;
            self.cache.remove(job_id);
        }
        self.locks.remove(job_id);
        debug!(job_id = %job_id, "Deleted job record");
        Ok(())
    }

    /// Jobs matching `filter`, most recently accessed first.
    pub fn list(&self, filter: &JobFilter) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .cache
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        records
    }

    /// Every record, tombstoned ones included.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.cache.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobInput, RetentionWindow, StepKind};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn new_record(owner: &str) -> JobRecord {
        JobRecord::new(
            JobId::generate(),
            Some(owner.to_string()),
            "title",
            JobInput {
                video_filename: "v.mp4".into(),
                original_filename: "v.mp4".into(),
                language: None,
            },
            Utc::now(),
            &RetentionWindow::default(),
        )
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let record = new_record("alice");
        let id = store.create(record.clone()).await.unwrap();

        assert_eq!(store.get(&id).unwrap(), record);
        assert!(store.create(record).await.is_err());

        let (updated, ticket) = store
            .update(&id, |r| {
                r.enqueue_step(StepKind::Transcribe, 1, Utc::now())?;
                Ok(1u64)
            })
            .await
            .unwrap();
        assert_eq!(ticket, 1);
        assert_eq!(updated.pending_steps.len(), 1);
        assert_eq!(store.get(&id).unwrap(), updated);
    }

    #[tokio::test]
    async fn test_failed_mutator_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let id = store.create(new_record("alice")).await.unwrap();
        let before = store.get(&id).unwrap();

        let result = store
            .update(&id, |r| {
                r.title = "changed".into();
                Err::<(), _>(Error::validation("nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(&id).unwrap(), before);

        let reopened = JobStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_reopen_recovers_records() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = JobStore::open(dir.path()).await.unwrap();
            let id = store.create(new_record("alice")).await.unwrap();
            store
                .update(&id, |r| {
                    r.pinned = true;
                    Ok(())
                })
                .await
                .unwrap();
            id
        };
        tokio::fs::write(dir.path().join(".tmp-abandoned.json"), b"{")
            .await
            .unwrap();

        let store = JobStore::open(dir.path()).await.unwrap();
        assert!(store.get(&id).unwrap().pinned);
        assert_eq!(store.len(), 1);
        assert!(!dir.path().join(".tmp-abandoned.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).await.unwrap());
        let id = store.create(new_record("alice")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(&id, |r| {
                        r.title.push('x');
                        Ok(())
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(&id).unwrap().title, format!("title{}", "x".repeat(20)));
    }

    #[tokio::test]
    async fn test_jobs_do_not_block_each_other() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let a = store.create(new_record("alice")).await.unwrap();
        let b = store.create(new_record("bob")).await.unwrap();

        let lock_a = store.lock_for(&a);
        let _held = lock_a.lock().await;

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            store.update(&b, |r| {
                r.pinned = true;
                Ok(())
            }),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_by_owner_and_tombstone() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let a = store.create(new_record("alice")).await.unwrap();
        store.create(new_record("bob")).await.unwrap();
        let a2 = store.create(new_record("alice")).await.unwrap();

        assert_eq!(store.list(&JobFilter::owned_by("alice")).len(), 2);
        assert_eq!(store.list(&JobFilter::default().with_limit(1)).len(), 1);

        store.tombstone(&a, |_| Ok(())).await.unwrap();
        let alice = store.list(&JobFilter::owned_by("alice"));
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].job_id, a2);
        assert!(store.get(&a).unwrap_err().is_not_found());

        store.delete(&a).await.unwrap();
        assert_eq!(store.snapshot().len(), 2);
    }
}
