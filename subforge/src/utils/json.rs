//! JSON file helpers with atomic replacement and consistent warning logs.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::Result;
use crate::utils::fs::io_error;

/// What a JSON document on disk belongs to, for log context.
#[derive(Debug, Clone, Copy)]
pub enum JsonContext<'a> {
    JobRecord { job_id: &'a str },
    SubtitleState { job_id: &'a str },
    Transcript { job_id: &'a str },
}

impl JsonContext<'_> {
    fn describe(&self) -> (&'static str, &str) {
        match *self {
            JsonContext::JobRecord { job_id } => ("job_record", job_id),
            JsonContext::SubtitleState { job_id } => ("subtitle_state", job_id),
            JsonContext::Transcript { job_id } => ("transcript", job_id),
        }
    }
}

/// Read and deserialize a JSON file.
pub async fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| io_error("reading json file", path, e))?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Read a JSON file, logging and returning `None` when it is missing or corrupt.
pub async fn read_json_file_or_warn<T: DeserializeOwned>(
    path: &Path,
    ctx: JsonContext<'_>,
) -> Option<T> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            let (kind, job_id) = ctx.describe();
            warn!(job_id = %job_id, kind, path = %path.display(), error = %e, "Failed to read JSON file");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            let (kind, job_id) = ctx.describe();
            warn!(
                job_id = %job_id,
                kind,
                raw_len = raw.len(),
                error = %e,
                "Ignoring unparseable JSON document"
            );
            None
        }
    }
}

/// Serialize `value` and atomically replace `path` with it.
///
/// The document is written to a temporary file in the same directory, flushed
/// to disk and renamed over the destination, so readers only ever observe the
/// old or the new contents.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path.to_path_buf(), bytes).await
}

/// Atomically replace `path` with `bytes`.
pub async fn write_bytes_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_bytes_atomic_sync(&path, &bytes))
        .await
        .map_err(|e| crate::Error::Other(format!("Atomic write task failed: {}", e)))?
}

fn write_bytes_atomic_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .suffix(".json")
        .tempfile_in(dir)
        .map_err(|e| io_error("creating temp file", dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| io_error("writing temp file", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| io_error("syncing temp file", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| io_error("replacing file", path, e.error))?;
    Ok(())
}
