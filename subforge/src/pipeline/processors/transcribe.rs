//! Transcription processor.
//!
//! Probes the upload, runs the configured speech-to-text command and turns
//! its segments into the initial subtitle document.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use process_utils::StreamKind;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::ToolConfig;
use super::error::StepError;
use super::traits::{Processor, ProcessorOutput, StepContext};
use super::utils::{ensure_success, run_tool};
use crate::domain::subtitle::{
    StyleConfig, SubtitleDocument, TranscriptSegment, VideoSize, Word, blocks_from_segments,
};
use crate::domain::{JobOutput, StepKind};
use crate::storage::ArtifactKind;
use crate::utils::{fs, json};

/// Exit code the transcription command uses for unreadable or unsupported media.
const EXIT_UNSUPPORTED_MEDIA: i32 = 65;

const TRANSCRIBER: &str = "transcriber";

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// What the render steps need to know about the upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub size: VideoSize,
    pub duration_secs: f64,
}

#[derive(Debug, Deserialize)]
struct TranscriptFile {
    segments: Vec<TranscriptSegment>,
}

pub struct TranscribeProcessor {
    tools: ToolConfig,
    max_video_secs: u64,
}

impl TranscribeProcessor {
    pub fn new(tools: ToolConfig, max_video_secs: u64) -> Self {
        Self {
            tools,
            max_video_secs,
        }
    }

    async fn probe(&self, ctx: &StepContext, video: &Path) -> Result<VideoProbe, StepError> {
        let mut command = process_utils::tokio_command(&self.tools.ffprobe_path);
        command
            .args(["-v", "error", "-print_format", "json"])
            .args(["-show_entries", "stream=codec_type,width,height:format=duration"])
            .arg(video);

        let run = run_tool(ctx, "ffprobe", &mut command).await?;
        if !run.status.success() {
            return Err(StepError::input_invalid_with_hint(
                "The uploaded file could not be read as a video.",
                "Upload a standard video file such as MP4 or MOV.",
            ));
        }
        let stdout: String = run
            .lines
            .iter()
            .filter(|l| l.stream == StreamKind::Stdout)
            .map(|l| l.line.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        parse_probe(&stdout, self.max_video_secs)
    }

    fn transcribe_command(
        &self,
        video: &Path,
        output: &Path,
        language: Option<&str>,
    ) -> Result<Command, StepError> {
        let args = expand_template(&self.tools.transcribe_command, video, output, language);
        let Some((program, rest)) = args.split_first() else {
            return Err(StepError::dependency(TRANSCRIBER, "no transcription command configured"));
        };
        let mut command = process_utils::tokio_command(program);
        command.args(rest);
        Ok(command)
    }
}

/// Split the command template and substitute the placeholders.
fn expand_template(template: &str, video: &Path, output: &Path, language: Option<&str>) -> Vec<String> {
    let input = video.to_string_lossy();
    let output = output.to_string_lossy();
    let language = language.filter(|l| !l.trim().is_empty()).unwrap_or("auto");
    template
        .split_whitespace()
        .map(|arg| {
            arg.replace("{input}", &input)
                .replace("{output}", &output)
                .replace("{language}", language)
        })
        .collect()
}

fn parse_probe(stdout: &str, max_video_secs: u64) -> Result<VideoProbe, StepError> {
    let unreadable = || {
        StepError::input_invalid_with_hint(
            "The uploaded file could not be read as a video.",
            "Upload a standard video file such as MP4 or MOV.",
        )
    };
    let probe: ProbeOutput = serde_json::from_str(stdout).map_err(|_| unreadable())?;

    let size = probe
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .find_map(|s| match (s.width, s.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(VideoSize { width, height })
            }
            _ => None,
        })
        .ok_or_else(|| StepError::input_invalid("The uploaded file has no video track."))?;

    let duration_secs = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(unreadable)?;

    if duration_secs > max_video_secs as f64 {
        return Err(StepError::input_invalid_with_hint(
            format!(
                "The video is {:.0} seconds long; the limit is {} seconds.",
                duration_secs, max_video_secs
            ),
            "Trim the video and upload it again.",
        ));
    }

    Ok(VideoProbe {
        size,
        duration_secs,
    })
}

#[async_trait]
impl Processor for TranscribeProcessor {
    fn steps(&self) -> &'static [StepKind] {
        &[StepKind::Transcribe]
    }

    async fn process(&self, ctx: &StepContext) -> Result<ProcessorOutput, StepError> {
        let start = Instant::now();
        let job_id = ctx.job_id();
        let video = ctx.video_path();

        if !tokio::fs::try_exists(&video).await.unwrap_or(false) {
            return Err(StepError::NotFound(
                "The uploaded video no longer exists.".to_string(),
            ));
        }

        let probe = self.probe(ctx, &video).await?;
        debug!(
            job_id = %job_id,
            width = probe.size.width,
            height = probe.size.height,
            duration_secs = probe.duration_secs,
            "Probed upload"
        );

        let raw_path = ctx.artifacts.path(job_id, ArtifactKind::RawTranscript);
        fs::ensure_parent_dir(&raw_path).await?;
        fs::remove_file_if_exists(&raw_path).await?;

        let mut command =
            self.transcribe_command(&video, &raw_path, ctx.job.input.language.as_deref())?;
        let run = run_tool(ctx, TRANSCRIBER, &mut command).await?;
        if run.status.code() == Some(EXIT_UNSUPPORTED_MEDIA) {
            return Err(StepError::input_invalid_with_hint(
                "The audio in this video could not be decoded.",
                "Re-encode the video with a common audio codec such as AAC.",
            ));
        }
        ensure_success(TRANSCRIBER, &run)?;

        let transcript: TranscriptFile = json::read_json_file(&raw_path).await.map_err(|e| {
            StepError::dependency(TRANSCRIBER, format!("unreadable transcript: {e}"))
        })?;
        let words: Vec<Word> = transcript
            .segments
            .iter()
            .flat_map(|s| s.words.iter().cloned())
            .collect();

        let style = StyleConfig {
            play_res_x: probe.size.width,
            play_res_y: probe.size.height,
            ..StyleConfig::default()
        };
        let document = SubtitleDocument {
            title: ctx.job.title.clone(),
            video_filename: ctx.job.input.video_filename.clone(),
            subtitles: blocks_from_segments(&transcript.segments, style.max_words_per_line),
            style,
            video_size: Some(probe.size),
            revision: 0,
        };
        let document = ctx.subtitles.save(job_id, document).await?;
        ctx.subtitles.save_words(job_id, &words).await?;

        info!(
            job_id = %job_id,
            blocks = document.subtitles.len(),
            words = words.len(),
            "Transcription finished"
        );

        Ok(ProcessorOutput {
            output: JobOutput {
                step: Some(StepKind::Transcribe),
                ticket: ctx.ticket,
                subtitle_url: Some(ctx.artifacts.url(job_id, ArtifactKind::Srt, Some(ctx.ticket))),
                ..Default::default()
            },
            duration_secs: start.elapsed().as_secs_f64(),
            follow_up: vec![StepKind::PreviewRender],
        })
    }

    fn name(&self) -> &'static str {
        "TranscribeProcessor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use std::path::PathBuf;

    #[test]
    fn test_expand_template() {
        let args = expand_template(
            "whisper-json --in {input} --out={output} -l {language}",
            &PathBuf::from("/up/a.mp4"),
            &PathBuf::from("/out/t.json"),
            None,
        );
        assert_eq!(
            args,
            vec!["whisper-json", "--in", "/up/a.mp4", "--out=/out/t.json", "-l", "auto"]
        );
    }

    #[test]
    fn test_parse_probe() {
        let stdout = r#"{
            "streams": [
                {"codec_type": "audio"},
                {"codec_type": "video", "width": 1280, "height": 720}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let probe = parse_probe(stdout, 900).unwrap();
        assert_eq!(probe.size, VideoSize { width: 1280, height: 720 });
        assert!((probe.duration_secs - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_rejects_long_and_audio_only() {
        let long = r#"{"streams": [{"codec_type": "video", "width": 2, "height": 2}],
                       "format": {"duration": "901"}}"#;
        assert_eq!(parse_probe(long, 900).unwrap_err().kind(), ErrorKind::InputInvalid);

        let audio = r#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "3"}}"#;
        assert_eq!(parse_probe(audio, 900).unwrap_err().kind(), ErrorKind::InputInvalid);

        assert!(parse_probe("not json", 900).is_err());
    }
}
