//! Plain subtitle file formats.

use super::document::SubtitleBlock;
use super::timestamp::Timestamp;
use crate::{Error, Result};

/// Render blocks as SubRip: index, `start --> end`, text, blank line.
pub fn to_srt(blocks: &[SubtitleBlock]) -> String {
    let mut out = String::new();
    for (i, block) in blocks.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            block.start,
            block.end,
            block.text.trim()
        ));
    }
    out
}

/// Render blocks as WebVTT.
pub fn to_vtt(blocks: &[SubtitleBlock]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for block in blocks {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            block.start.to_vtt(),
            block.end.to_vtt(),
            block.text.trim()
        ));
    }
    out
}

/// Parse SubRip text. Cue numbers are ignored; multi-line cue text is kept
/// with `\n` separators.
pub fn parse_srt(input: &str) -> Result<Vec<SubtitleBlock>> {
    let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut blocks = Vec::new();

    for (cue_no, cue) in normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .enumerate()
    {
        let mut lines = cue.lines();
        let mut timing = lines
            .next()
            .ok_or_else(|| Error::validation(format!("Cue {} is empty", cue_no + 1)))?;
        if !timing.contains("-->") {
            timing = lines.next().ok_or_else(|| {
                Error::validation(format!("Cue {} has no timing line", cue_no + 1))
            })?;
        }
        let (start, end) = timing.split_once("-->").ok_or_else(|| {
            Error::validation(format!("Cue {} has no timing line", cue_no + 1))
        })?;
        let start: Timestamp = start.trim().parse()?;
        // Drop cue settings after the end time.
        let end: Timestamp = end
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .parse()?;
        let text = lines.collect::<Vec<_>>().join("\n");
        blocks.push(SubtitleBlock::new(start, end, text));
    }

    Ok(blocks)
}
