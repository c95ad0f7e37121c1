//! Step processors: transcription and the burn-in renders.

pub mod ass;
pub mod error;
pub mod karaoke;
pub mod render;
pub mod traits;
pub mod transcribe;
pub mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use error::StepError;
pub use karaoke::{DivergencePolicy, build_karaoke_lines, resync_words_to_blocks};
pub use render::RenderProcessor;
pub use traits::{Processor, ProcessorOutput, StepContext};
pub use transcribe::TranscribeProcessor;

use crate::storage::StorageConfig;

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_transcribe_command() -> String {
    "subforge-transcribe {input} {output} --language {language}".to_string()
}

/// External tools the processors shell out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Whitespace-separated command line. `{input}`, `{output}` and
    /// `{language}` are substituted per argument; the language is `auto`
    /// when the upload did not name one.
    #[serde(default = "default_transcribe_command")]
    pub transcribe_command: String,
    /// Extra fonts directory for libass.
    #[serde(default)]
    pub fonts_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            transcribe_command: default_transcribe_command(),
            fonts_dir: None,
        }
    }
}

fn default_preview_crf() -> u8 {
    28
}

fn default_preview_preset() -> String {
    "veryfast".to_string()
}

fn default_export_crf() -> u8 {
    20
}

fn default_export_preset() -> String {
    "medium".to_string()
}

/// Encoder settings for previews and exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub divergence_policy: DivergencePolicy,
    #[serde(default = "default_preview_crf")]
    pub preview_crf: u8,
    #[serde(default = "default_preview_preset")]
    pub preview_preset: String,
    #[serde(default = "default_export_crf")]
    pub export_crf: u8,
    #[serde(default = "default_export_preset")]
    pub export_preset: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            divergence_policy: DivergencePolicy::default(),
            preview_crf: default_preview_crf(),
            preview_preset: default_preview_preset(),
            export_crf: default_export_crf(),
            export_preset: default_export_preset(),
        }
    }
}

/// The processors that run every step kind after the upload.
pub fn default_processors(
    tools: &ToolConfig,
    render: &RenderConfig,
    storage: &StorageConfig,
) -> Vec<Arc<dyn Processor>> {
    vec![
        Arc::new(TranscribeProcessor::new(tools.clone(), storage.max_video_secs)),
        Arc::new(RenderProcessor::new(tools.clone(), render.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepKind;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_step_after_upload_has_a_processor() {
        let processors = default_processors(
            &ToolConfig::default(),
            &RenderConfig::default(),
            &StorageConfig::default(),
        );
        for step in StepKind::iter().filter(|s| *s != StepKind::Upload) {
            let count = processors.iter().filter(|p| p.can_process(step)).count();
            assert_eq!(count, 1, "{step} must have exactly one processor");
        }
    }

    #[test]
    fn test_render_config_partial_json() {
        let config: RenderConfig =
            serde_json::from_str(r#"{"divergence_policy": "plain", "export_crf": 18}"#).unwrap();
        assert_eq!(config.divergence_policy, DivergencePolicy::Plain);
        assert_eq!(config.export_crf, 18);
        assert_eq!(config.preview_preset, "veryfast");
    }
}
