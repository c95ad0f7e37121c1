//! Durable state: job records, subtitle documents and on-disk artifacts.

pub mod artifacts;
pub mod job_log;
pub mod job_store;
pub mod subtitle_store;

use serde::{Deserialize, Serialize};

pub use artifacts::{ArtifactKind, ArtifactStore};
pub use job_log::JobLog;
pub use job_store::{JobFilter, JobStore};
pub use subtitle_store::SubtitleStore;

/// Limits on uploads and total disk usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cap on the total size of uploads, outputs and job logs.
    #[serde(default = "default_max_storage_bytes")]
    pub max_storage_bytes: u64,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Longest accepted video.
    #[serde(default = "default_max_video_secs")]
    pub max_video_secs: u64,
    /// Lowercase extensions without the dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Number of jobs returned by the recent-jobs listing.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

fn default_max_storage_bytes() -> u64 {
    20 * 1024 * 1024 * 1024
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

fn default_max_video_secs() -> u64 {
    15 * 60
}

fn default_allowed_extensions() -> Vec<String> {
    ["mp4", "mov", "mkv", "webm", "m4v"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_recent_limit() -> usize {
    8
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_storage_bytes: default_max_storage_bytes(),
            max_upload_bytes: default_max_upload_bytes(),
            max_video_secs: default_max_video_secs(),
            allowed_extensions: default_allowed_extensions(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl StorageConfig {
    /// Lowercased extension of `filename` if it is on the allow list.
    pub fn accepted_extension(&self, filename: &str) -> Option<String> {
        let (_, ext) = filename.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();
        self.allowed_extensions.contains(&ext).then_some(ext)
    }
}
