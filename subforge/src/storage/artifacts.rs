//! Filesystem layout for uploads, rendered outputs and per-job logs.
//!
//! ```text
//! {root}/uploads/{job_id}.{ext}
//! {root}/outputs/{job_id}/{artifact}
//! {root}/logs/{job_id}.log
//! {root}/jobs/{job_id}.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::Result;
use crate::domain::{JobId, Ticket};
use crate::utils::fs::{self, io_error};

/// Files younger than this are never treated as orphans; an upload may still
/// be streaming before its record exists.
const ORPHAN_MIN_AGE: Duration = Duration::from_secs(60 * 60);

/// URL prefix under which the outputs directory is served.
pub const OUTPUTS_URL_PREFIX: &str = "/outputs";

/// A job-scoped file in the outputs directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    SubtitleState,
    TranscriptWords,
    RawTranscript,
    Srt,
    Vtt,
    PreviewAss,
    PreviewVideo,
    StandardAss,
    StandardVideo,
    KaraokeAss,
    KaraokeVideo,
}

impl ArtifactKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::SubtitleState => "subtitles.json",
            Self::TranscriptWords => "words.json",
            Self::RawTranscript => "transcript.raw.json",
            Self::Srt => "subtitles.srt",
            Self::Vtt => "subtitles.vtt",
            Self::PreviewAss => "preview.ass",
            Self::PreviewVideo => "preview.mp4",
            Self::StandardAss => "subtitled.ass",
            Self::StandardVideo => "subtitled.mp4",
            Self::KaraokeAss => "karaoke.ass",
            Self::KaraokeVideo => "karaoke.mp4",
        }
    }
}

/// Root of all on-disk artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory layout.
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.uploads_dir(),
            self.outputs_dir(),
            self.logs_dir(),
            self.jobs_dir(),
        ] {
            fs::ensure_dir_all_with_op("creating data directory", &dir).await?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    /// Stored upload for a job, `video_filename` as recorded on the job input.
    pub fn upload_path(&self, video_filename: &str) -> PathBuf {
        self.uploads_dir().join(video_filename)
    }

    /// Name under which an upload with extension `ext` is stored.
    pub fn upload_file_name(job_id: &JobId, ext: &str) -> String {
        format!("{job_id}.{ext}")
    }

    pub fn job_output_dir(&self, job_id: &JobId) -> PathBuf {
        self.outputs_dir().join(job_id.as_str())
    }

    pub fn path(&self, job_id: &JobId, kind: ArtifactKind) -> PathBuf {
        self.job_output_dir(job_id).join(kind.file_name())
    }

    /// Sibling an encoder writes to before the result replaces `kind`.
    pub fn partial_path(&self, job_id: &JobId, kind: ArtifactKind) -> PathBuf {
        let name = kind.file_name();
        let partial = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}.partial.{ext}"),
            None => format!("{name}.partial"),
        };
        self.job_output_dir(job_id).join(partial)
    }

    pub fn log_path(&self, job_id: &JobId) -> PathBuf {
        self.logs_dir().join(format!("{job_id}.log"))
    }

    /// Public URL of an artifact. The ticket busts client caches.
    pub fn url(&self, job_id: &JobId, kind: ArtifactKind, ticket: Option<Ticket>) -> String {
        let base = format!("{OUTPUTS_URL_PREFIX}/{job_id}/{}", kind.file_name());
        match ticket {
            Some(t) => format!("{base}?v={t}"),
            None => base,
        }
    }

    /// Bytes used by one job's upload, outputs and log.
    pub async fn job_size(&self, job_id: &JobId, video_filename: &str) -> Result<u64> {
        let upload = file_len(&self.upload_path(video_filename)).await?;
        let outputs = fs::dir_size(&self.job_output_dir(job_id)).await?;
        let log = file_len(&self.log_path(job_id)).await?;
        Ok(upload + outputs + log)
    }

    /// Bytes used by all uploads, outputs and logs.
    pub async fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for dir in [self.uploads_dir(), self.outputs_dir(), self.logs_dir()] {
            total += fs::dir_size(&dir).await?;
        }
        Ok(total)
    }

    /// Remove every artifact of a job. Returns the number of bytes freed.
    pub async fn delete_job(&self, job_id: &JobId, video_filename: &str) -> Result<u64> {
        let mut freed = fs::remove_dir_if_exists(&self.job_output_dir(job_id)).await?;
        freed += fs::remove_file_if_exists(&self.upload_path(video_filename)).await?;
        freed += fs::remove_file_if_exists(&self.log_path(job_id)).await?;
        debug!(job_id = %job_id, freed, "Deleted job artifacts");
        Ok(freed)
    }

    /// Upload files, output directories and logs that belong to no known job.
    pub async fn find_orphans(&self, known: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let now = SystemTime::now();
        let mut orphans = Vec::new();

        for dir in [self.uploads_dir(), self.outputs_dir(), self.logs_dir()] {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error("listing artifacts", &dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| io_error("listing artifacts", &dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let job_id = name.split('.').next().unwrap_or_default();
                if known.contains(job_id) {
                    continue;
                }
                let old_enough = entry
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age >= ORPHAN_MIN_AGE);
                if old_enough {
                    orphans.push(entry.path());
                }
            }
        }

        Ok(orphans)
    }

    /// Remove an orphan found by [`find_orphans`](Self::find_orphans).
    pub async fn remove_orphan(&self, path: &Path) -> Result<u64> {
        if path.is_dir() {
            fs::remove_dir_if_exists(path).await
        } else {
            fs::remove_file_if_exists(path).await
        }
    }
}

async fn file_len(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(io_error("reading file metadata", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let store = ArtifactStore::new("/data");
        let id = JobId::parse("0123456789abcdef0123456789abcdef").unwrap();

        assert_eq!(
            store.path(&id, ArtifactKind::PreviewVideo),
            PathBuf::from("/data/outputs/0123456789abcdef0123456789abcdef/preview.mp4")
        );
        assert_eq!(
            store.partial_path(&id, ArtifactKind::KaraokeVideo),
            PathBuf::from("/data/outputs/0123456789abcdef0123456789abcdef/karaoke.partial.mp4")
        );
        assert_eq!(
            store.url(&id, ArtifactKind::Srt, Some(3)),
            "/outputs/0123456789abcdef0123456789abcdef/subtitles.srt?v=3"
        );
    }

    #[tokio::test]
    async fn test_sizes_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_layout().await.unwrap();
        let id = JobId::generate();
        let upload = ArtifactStore::upload_file_name(&id, "mp4");

        tokio::fs::write(store.upload_path(&upload), vec![0u8; 100])
            .await
            .unwrap();
        fs::ensure_dir_all(&store.job_output_dir(&id)).await.unwrap();
        tokio::fs::write(store.path(&id, ArtifactKind::PreviewVideo), vec![0u8; 50])
            .await
            .unwrap();
        tokio::fs::write(store.log_path(&id), vec![0u8; 7])
            .await
            .unwrap();

        assert_eq!(store.job_size(&id, &upload).await.unwrap(), 157);
        assert_eq!(store.total_size().await.unwrap(), 157);

        assert_eq!(store.delete_job(&id, &upload).await.unwrap(), 157);
        assert_eq!(store.total_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fresh_files_are_not_orphans() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.ensure_layout().await.unwrap();
        let id = JobId::generate();
        tokio::fs::write(store.log_path(&id), b"x").await.unwrap();

        let orphans = store.find_orphans(&HashSet::new()).await.unwrap();
        assert!(orphans.is_empty());
    }
}
