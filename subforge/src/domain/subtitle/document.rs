use serde::{Deserialize, Serialize};

use super::style::StyleConfig;
use super::timestamp::Timestamp;
use crate::{Error, Result};

/// Upper bound on blocks per document.
const MAX_BLOCKS: usize = 10_000;

/// One timed subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleBlock {
    pub start: Timestamp,
    pub end: Timestamp,
    pub text: String,
    /// Blocks split from the same transcript segment share a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
}

impl SubtitleBlock {
    pub fn new(start: Timestamp, end: Timestamp, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            group_id: None,
        }
    }
}

/// A transcribed word with fractional-second timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub start: f64,
    pub end: f64,
    #[serde(alias = "word")]
    pub text: String,
}

/// One segment returned by the transcription engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

/// The persisted editing state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleDocument {
    pub title: String,
    pub video_filename: String,
    #[serde(default)]
    pub subtitles: Vec<SubtitleBlock>,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_size: Option<VideoSize>,
    /// Bumped on every save.
    #[serde(default)]
    pub revision: u64,
}

impl SubtitleDocument {
    pub fn validate(&self) -> Result<()> {
        if self.subtitles.len() > MAX_BLOCKS {
            return Err(Error::validation(format!(
                "Too many subtitle blocks ({} > {})",
                self.subtitles.len(),
                MAX_BLOCKS
            )));
        }
        for (i, block) in self.subtitles.iter().enumerate() {
            if block.end < block.start {
                return Err(Error::validation(format!(
                    "Block {} ends ({}) before it starts ({})",
                    i + 1,
                    block.end,
                    block.start
                )));
            }
        }
        self.style.validate()
    }

    /// Blocks ordered by start time, as they are rendered.
    pub fn sorted_blocks(&self) -> Vec<SubtitleBlock> {
        let mut blocks = self.subtitles.clone();
        blocks.sort_by_key(|b| (b.start, b.end));
        blocks
    }
}

/// Turn transcript segments into editable blocks of at most `max_words` words.
///
/// Segments with word timings are split on word boundaries and take their
/// times from the words; segments without words are split evenly.
pub fn blocks_from_segments(segments: &[TranscriptSegment], max_words: usize) -> Vec<SubtitleBlock> {
    let max_words = max_words.max(1);
    let mut blocks = Vec::new();

    for (index, segment) in segments.iter().enumerate() {
        let group_id = Some(index as u32);
        let words: Vec<&Word> = segment
            .words
            .iter()
            .filter(|w| !w.text.trim().is_empty())
            .collect();

        if !words.is_empty() {
            for chunk in words.chunks(max_words) {
                let text = chunk
                    .iter()
                    .map(|w| w.text.trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                blocks.push(SubtitleBlock {
                    start: Timestamp::from_secs_f64(chunk[0].start),
                    end: Timestamp::from_secs_f64(chunk[chunk.len() - 1].end),
                    text,
                    group_id,
                });
            }
            continue;
        }

        let tokens: Vec<&str> = segment.text.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        let chunks: Vec<&[&str]> = tokens.chunks(max_words).collect();
        let span = (segment.end - segment.start).max(0.0) / chunks.len() as f64;
        for (i, chunk) in chunks.iter().enumerate() {
            let start = segment.start + span * i as f64;
            blocks.push(SubtitleBlock {
                start: Timestamp::from_secs_f64(start),
                end: Timestamp::from_secs_f64(start + span),
                text: chunk.join(" "),
                group_id,
            });
        }
    }

    blocks
}
