//! Subtitle model: timestamps, blocks, transcript words and render style.

mod document;
mod srt;
mod style;
mod timestamp;

pub use document::{
    SubtitleBlock, SubtitleDocument, TranscriptSegment, VideoSize, Word, blocks_from_segments,
};
pub use srt::{parse_srt, to_srt, to_vtt};
pub use style::{Position, StyleConfig, StylePreset, builtin_presets};
pub use timestamp::Timestamp;
