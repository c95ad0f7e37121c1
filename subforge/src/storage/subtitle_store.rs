//! Persisted subtitle documents and transcript words.
//!
//! Saves for one job are serialized and each document write is an atomic
//! replace, so concurrent editors can never produce a mixed file: the last
//! save wins as a whole.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::JobId;
use crate::domain::subtitle::{SubtitleDocument, Word, to_srt, to_vtt};
use crate::storage::artifacts::{ArtifactKind, ArtifactStore};
use crate::utils::fs;
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

pub struct SubtitleStore {
    artifacts: Arc<ArtifactStore>,
    locks: DashMap<JobId, Arc<Mutex<()>>>,
}

impl SubtitleStore {
    pub fn new(artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            artifacts,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, job_id: &JobId) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Latest saved document for a job.
    pub async fn load(&self, job_id: &JobId) -> Result<SubtitleDocument> {
        let path = self.artifacts.path(job_id, ArtifactKind::SubtitleState);
        json::read_json_file(&path).await.map_err(|e| {
            if e.is_not_found() {
                Error::not_found("Subtitles", job_id.as_str())
            } else {
                e
            }
        })
    }

    /// Validate and persist `document`, replacing the previous one.
    ///
    /// The revision is set to one past the stored revision. The SRT and VTT
    /// exports are regenerated from the saved blocks. Returns the document as
    /// written.
    pub async fn save(&self, job_id: &JobId, mut document: SubtitleDocument) -> Result<SubtitleDocument> {
        document.validate()?;

        let lock = self.lock_for(job_id);
        let _guard = lock.lock().await;

        let path = self.artifacts.path(job_id, ArtifactKind::SubtitleState);
        fs::ensure_parent_dir(&path).await?;
        let previous: Option<SubtitleDocument> = json::read_json_file_or_warn(
            &path,
            JsonContext::SubtitleState {
                job_id: job_id.as_str(),
            },
        )
        .await;
        document.revision = previous.map_or(1, |p| p.revision + 1);

        json::write_json_atomic(&path, &document).await?;

        let blocks = document.sorted_blocks();
        json::write_bytes_atomic(
            self.artifacts.path(job_id, ArtifactKind::Srt),
            to_srt(&blocks).into_bytes(),
        )
        .await?;
        json::write_bytes_atomic(
            self.artifacts.path(job_id, ArtifactKind::Vtt),
            to_vtt(&blocks).into_bytes(),
        )
        .await?;

        Ok(document)
    }

    /// Transcript words, empty when the job has none.
    pub async fn load_words(&self, job_id: &JobId) -> Vec<Word> {
        json::read_json_file_or_warn(
            &self.artifacts.path(job_id, ArtifactKind::TranscriptWords),
            JsonContext::Transcript {
                job_id: job_id.as_str(),
            },
        )
        .await
        .unwrap_or_default()
    }

    pub async fn save_words(&self, job_id: &JobId, words: &[Word]) -> Result<()> {
        let path = self.artifacts.path(job_id, ArtifactKind::TranscriptWords);
        fs::ensure_parent_dir(&path).await?;
        json::write_json_atomic(&path, &words).await
    }

    /// Drop the lock entry of a deleted job.
    pub fn forget(&self, job_id: &JobId) {
        self.locks.remove(job_id);
    }
}
