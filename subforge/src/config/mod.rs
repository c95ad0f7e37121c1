//! Application configuration.
//!
//! Everything is read from the process environment (after `.env` has been
//! loaded by `main`), falling back to the defaults of each sub-config.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::server::ApiServerConfig;
use crate::pipeline::{DivergencePolicy, RenderConfig, RetentionConfig, ToolConfig, WorkerPoolConfig};
use crate::storage::StorageConfig;

/// Top-level configuration for the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root of uploads, outputs, logs and job records.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory for the rolling service log.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(skip)]
    pub api: ApiServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workers: WorkerPoolConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub tools: ToolConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            api: ApiServerConfig::default(),
            storage: StorageConfig::default(),
            workers: WorkerPoolConfig::default(),
            retention: RetentionConfig::default(),
            tools: ToolConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `SUBFORGE_DATA_DIR`, `SUBFORGE_LOG_DIR`
    /// - `API_BIND_ADDRESS`, `API_PORT`
    /// - `MAX_STORAGE_BYTES`, `MAX_UPLOAD_BYTES`, `MAX_VIDEO_SECONDS`, `JOB_RECENT_LIMIT`
    /// - `JOB_WORKER_COUNT`, `JOB_QUEUE_CAPACITY`, `TRANSCRIBE_TIMEOUT_SECS`,
    ///   `PREVIEW_TIMEOUT_SECS`, `EXPORT_TIMEOUT_SECS`
    /// - `JOB_RETENTION_DAYS`, `JOB_PINNED_RETENTION_DAYS`, `JOB_LOCK_TTL_MINUTES`,
    ///   `JOB_CLEANUP_BATCH`, `JOB_SWEEP_INTERVAL_SECS`
    /// - `FFMPEG_PATH`, `FFPROBE_PATH`, `TRANSCRIBE_COMMAND`, `FONTS_DIR`
    /// - `KARAOKE_DIVERGENCE_POLICY` (`even`, `by_length` or `plain`)
    pub fn from_env_or_default() -> Self {
        let mut config = Self {
            api: ApiServerConfig::from_env_or_default(),
            ..Self::default()
        };

        if let Some(dir) = env_string("SUBFORGE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env_string("SUBFORGE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        let storage = &mut config.storage;
        env_override("MAX_STORAGE_BYTES", &mut storage.max_storage_bytes);
        env_override("MAX_UPLOAD_BYTES", &mut storage.max_upload_bytes);
        env_override("MAX_VIDEO_SECONDS", &mut storage.max_video_secs);
        env_override("JOB_RECENT_LIMIT", &mut storage.recent_limit);

        let workers = &mut config.workers;
        env_override("JOB_WORKER_COUNT", &mut workers.worker_count);
        env_override("JOB_QUEUE_CAPACITY", &mut workers.queue_capacity);
        env_override("TRANSCRIBE_TIMEOUT_SECS", &mut workers.budgets.transcribe_secs);
        env_override("PREVIEW_TIMEOUT_SECS", &mut workers.budgets.preview_secs);
        env_override("EXPORT_TIMEOUT_SECS", &mut workers.budgets.export_secs);

        let retention = &mut config.retention;
        env_override("JOB_RETENTION_DAYS", &mut retention.retention_days);
        env_override("JOB_PINNED_RETENTION_DAYS", &mut retention.pinned_retention_days);
        env_override("JOB_LOCK_TTL_MINUTES", &mut retention.lock_ttl_minutes);
        env_override("JOB_CLEANUP_BATCH", &mut retention.batch_size);
        env_override("JOB_SWEEP_INTERVAL_SECS", &mut retention.check_interval_secs);
        retention.max_storage_bytes = config.storage.max_storage_bytes;

        if let Some(path) = env_string("FFMPEG_PATH") {
            config.tools.ffmpeg_path = path;
        }
        if let Some(path) = env_string("FFPROBE_PATH") {
            config.tools.ffprobe_path = path;
        }
        if let Some(template) = env_string("TRANSCRIBE_COMMAND") {
            config.tools.transcribe_command = template;
        }
        if let Some(dir) = env_string("FONTS_DIR") {
            config.tools.fonts_dir = Some(PathBuf::from(dir));
        }
        env_override::<DivergencePolicy>(
            "KARAOKE_DIVERGENCE_POLICY",
            &mut config.render.divergence_policy,
        );

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Overwrite `target` with the parsed value of `key`, warning on bad input.
fn env_override<T: FromStr>(key: &str, target: &mut T) {
    let Some(raw) = env_string(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = AppConfig::default();
        assert_eq!(config.storage.max_storage_bytes, 20 * 1024 * 1024 * 1024);
        assert_eq!(config.storage.max_upload_bytes, 500 * 1024 * 1024);
        assert_eq!(config.workers.worker_count, 1);
        assert_eq!(config.retention.retention_days, 14);
        assert_eq!(config.retention.pinned_retention_days, 30);
        assert_eq!(config.retention.batch_size, 5);
        assert_eq!(config.render.divergence_policy, DivergencePolicy::Even);
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let mut value = 7u32;
        // SAFETY: test-local variable name, no concurrent readers.
        unsafe { std::env::set_var("SUBFORGE_TEST_OVERRIDE", "not-a-number") };
        env_override("SUBFORGE_TEST_OVERRIDE", &mut value);
        assert_eq!(value, 7);

        unsafe { std::env::set_var("SUBFORGE_TEST_OVERRIDE", " 42 ") };
        env_override("SUBFORGE_TEST_OVERRIDE", &mut value);
        assert_eq!(value, 42);
        unsafe { std::env::remove_var("SUBFORGE_TEST_OVERRIDE") };
    }
}
