//! Burn-in renders: preview, standard export and karaoke export.
//!
//! Every render reads the latest saved subtitle document, writes its ASS
//! script next to the output and encodes into a `.partial` sibling that only
//! replaces the published video once ffmpeg has exited successfully.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use super::ass::build_ass;
use super::error::StepError;
use super::karaoke::{DivergencePolicy, build_karaoke_lines};
use super::traits::{Processor, ProcessorOutput, StepContext};
use super::utils::{ensure_success, run_tool, sanitize_file_stem, subtitles_filter};
use super::{RenderConfig, ToolConfig};
use crate::domain::{JobOutput, StepKind};
use crate::storage::ArtifactKind;
use crate::utils::fs::{self, io_error};
use crate::utils::json;

/// Per-step render settings.
struct RenderPlan<'a> {
    ass: ArtifactKind,
    video: ArtifactKind,
    crf: u8,
    preset: &'a str,
    /// Suffix of the download name; previews are not downloads.
    download_suffix: Option<&'static str>,
}

pub struct RenderProcessor {
    tools: ToolConfig,
    config: RenderConfig,
}

impl RenderProcessor {
    pub fn new(tools: ToolConfig, config: RenderConfig) -> Self {
        Self { tools, config }
    }

    fn plan(&self, step: StepKind) -> Result<RenderPlan<'_>, StepError> {
        let plan = match step {
            StepKind::PreviewRender => RenderPlan {
                ass: ArtifactKind::PreviewAss,
                video: ArtifactKind::PreviewVideo,
                crf: self.config.preview_crf,
                preset: &self.config.preview_preset,
                download_suffix: None,
            },
            StepKind::ExportStandard => RenderPlan {
                ass: ArtifactKind::StandardAss,
                video: ArtifactKind::StandardVideo,
                crf: self.config.export_crf,
                preset: &self.config.export_preset,
                download_suffix: Some("subtitled"),
            },
            StepKind::ExportKaraoke => RenderPlan {
                ass: ArtifactKind::KaraokeAss,
                video: ArtifactKind::KaraokeVideo,
                crf: self.config.export_crf,
                preset: &self.config.export_preset,
                download_suffix: Some("karaoke"),
            },
            other => {
                return Err(StepError::Internal(crate::Error::Other(format!(
                    "{other} is not a render step"
                ))));
            }
        };
        Ok(plan)
    }

    async fn encode(
        &self,
        ctx: &StepContext,
        plan: &RenderPlan<'_>,
        ass_path: &Path,
        partial: &Path,
    ) -> Result<(), StepError> {
        let mut command = process_utils::tokio_command(&self.tools.ffmpeg_path);
        command
            .args(["-y", "-hide_banner", "-i"])
            .arg(ctx.video_path())
            .arg("-vf")
            .arg(subtitles_filter(ass_path, self.tools.fonts_dir.as_deref()))
            .args(["-c:v", "libx264", "-preset", plan.preset])
            .arg("-crf")
            .arg(plan.crf.to_string())
            .args(["-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart"])
            .arg(partial);

        let run = run_tool(ctx, "ffmpeg", &mut command).await?;
        ensure_success("ffmpeg", &run)
    }
}

async fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial render");
    }
}

#[async_trait]
impl Processor for RenderProcessor {
    fn steps(&self) -> &'static [StepKind] {
        &[
            StepKind::PreviewRender,
            StepKind::ExportStandard,
            StepKind::ExportKaraoke,
        ]
    }

    async fn process(&self, ctx: &StepContext) -> Result<ProcessorOutput, StepError> {
        let start = Instant::now();
        let job_id = ctx.job_id();
        let plan = self.plan(ctx.step)?;

        let document = ctx.subtitles.load(job_id).await?;
        if !tokio::fs::try_exists(ctx.video_path()).await.unwrap_or(false) {
            return Err(StepError::NotFound(
                "The uploaded video no longer exists.".to_string(),
            ));
        }
        let words = ctx.subtitles.load_words(job_id).await;

        let blocks = document.sorted_blocks();
        let lines = match ctx.step {
            StepKind::ExportKaraoke if words.is_empty() => {
                return Err(StepError::input_invalid_with_hint(
                    "Transcript words not found.",
                    "Karaoke export needs word timings; use the standard export instead.",
                ));
            }
            StepKind::ExportStandard => build_karaoke_lines(&blocks, &[], DivergencePolicy::Plain),
            _ => build_karaoke_lines(&blocks, &words, self.config.divergence_policy),
        };
        let karaoke = lines.iter().any(|l| l.is_highlighted());

        let ass_path = ctx.artifacts.path(job_id, plan.ass);
        fs::ensure_parent_dir(&ass_path).await?;
        json::write_bytes_atomic(ass_path.clone(), build_ass(&lines, &document.style).into_bytes())
            .await?;

        let partial = ctx.artifacts.partial_path(job_id, plan.video);
        discard_partial(&partial).await;
        if let Err(e) = self.encode(ctx, &plan, &ass_path, &partial).await {
            discard_partial(&partial).await;
            return Err(e);
        }

        let target = ctx.artifacts.path(job_id, plan.video);
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            discard_partial(&partial).await;
            return Err(io_error("publishing render", &target, e).into());
        }

        info!(
            job_id = %job_id,
            step = %ctx.step,
            ticket = ctx.ticket,
            karaoke,
            blocks = blocks.len(),
            "Render finished"
        );

        Ok(ProcessorOutput {
            output: JobOutput {
                step: Some(ctx.step),
                ticket: ctx.ticket,
                video_url: Some(ctx.artifacts.url(job_id, plan.video, Some(ctx.ticket))),
                download_name: plan
                    .download_suffix
                    .map(|suffix| format!("{}_{suffix}.mp4", sanitize_file_stem(&document.title))),
                subtitle_url: Some(ctx.artifacts.url(job_id, ArtifactKind::Srt, Some(ctx.ticket))),
                karaoke,
            },
            duration_secs: start.elapsed().as_secs_f64(),
            follow_up: Vec::new(),
        })
    }

    fn name(&self) -> &'static str {
        "RenderProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_per_step() {
        let processor = RenderProcessor::new(ToolConfig::default(), RenderConfig::default());

        let preview = processor.plan(StepKind::PreviewRender).unwrap();
        assert_eq!(preview.video, ArtifactKind::PreviewVideo);
        assert!(preview.download_suffix.is_none());
        assert_eq!(preview.preset, "veryfast");

        let karaoke = processor.plan(StepKind::ExportKaraoke).unwrap();
        assert_eq!(karaoke.ass, ArtifactKind::KaraokeAss);
        assert_eq!(karaoke.download_suffix, Some("karaoke"));

        assert!(processor.plan(StepKind::Transcribe).is_err());
    }
}
