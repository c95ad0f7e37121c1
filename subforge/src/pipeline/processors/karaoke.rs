//! Word-level timing for karaoke highlighting.
//!
//! Transcript words keep their original timings while blocks are edited, so
//! each render re-derives per-word timings from the current blocks.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::subtitle::{SubtitleBlock, Timestamp, Word};

/// What to do when a block's word count no longer matches the transcript
/// words that fall inside it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DivergencePolicy {
    /// Spread the block's words evenly over its duration.
    #[default]
    Even,
    /// Give each word time in proportion to its length.
    ByLength,
    /// Render the block without highlighting.
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaraokeWord {
    pub text: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// One rendered line. `words` is empty for lines drawn without highlighting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KaraokeLine {
    pub start: Timestamp,
    pub end: Timestamp,
    pub text: String,
    pub words: Vec<KaraokeWord>,
}

impl KaraokeLine {
    pub fn is_highlighted(&self) -> bool {
        !self.words.is_empty()
    }
}

/// Build karaoke lines for `blocks`, which must be sorted by start time.
///
/// A transcript word belongs to the block containing its midpoint. When the
/// counts agree the transcript timings are used, clamped to the block;
/// otherwise `policy` decides.
pub fn build_karaoke_lines(
    blocks: &[SubtitleBlock],
    words: &[Word],
    policy: DivergencePolicy,
) -> Vec<KaraokeLine> {
    blocks
        .iter()
        .filter(|b| !b.text.trim().is_empty())
        .map(|block| {
            let tokens: Vec<&str> = block.text.split_whitespace().collect();
            let start = block.start.as_millis();
            let end = block.end.as_millis().max(start);

            let inside: Vec<&Word> = words
                .iter()
                .filter(|w| {
                    let mid = ((w.start + w.end) / 2.0 * 1000.0).round().max(0.0) as u64;
                    mid >= start && mid <= end
                })
                .collect();

            let words = if !inside.is_empty() && inside.len() == tokens.len() {
                from_transcript(&tokens, &inside, start, end)
            } else {
                match policy {
                    DivergencePolicy::Even => distribute(&tokens, start, end, |_| 1),
                    DivergencePolicy::ByLength => {
                        distribute(&tokens, start, end, |t| t.chars().count().max(1) as u64)
                    }
                    DivergencePolicy::Plain => Vec::new(),
                }
            };

            KaraokeLine {
                start: block.start,
                end: Timestamp::from_millis(end),
                text: tokens.join(" "),
                words,
            }
        })
        .collect()
}

fn from_transcript(tokens: &[&str], words: &[&Word], start: u64, end: u64) -> Vec<KaraokeWord> {
    let mut cursor = start;
    tokens
        .iter()
        .zip(words)
        .map(|(token, word)| {
            let ws = Timestamp::from_secs_f64(word.start).as_millis().clamp(cursor, end);
            let we = Timestamp::from_secs_f64(word.end).as_millis().clamp(ws, end);
            cursor = we;
            KaraokeWord {
                text: (*token).to_string(),
                start: Timestamp::from_millis(ws),
                end: Timestamp::from_millis(we),
            }
        })
        .collect()
}

fn distribute(tokens: &[&str], start: u64, end: u64, weight: impl Fn(&str) -> u64) -> Vec<KaraokeWord> {
    let weights: Vec<u64> = tokens.iter().map(|t| weight(t)).collect();
    let total: u64 = weights.iter().sum::<u64>().max(1);
    let span = end - start;

    let mut acc = 0;
    tokens
        .iter()
        .zip(weights)
        .map(|(token, w)| {
            let ws = start + span * acc / total;
            acc += w;
            let we = start + span * acc / total;
            KaraokeWord {
                text: (*token).to_string(),
                start: Timestamp::from_millis(ws),
                end: Timestamp::from_millis(we),
            }
        })
        .collect()
}

fn non_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\W+").unwrap())
}

fn normalize(text: &str) -> String {
    non_word().replace_all(&text.to_lowercase(), "").into_owned()
}

/// How far past the cursor to look for a block's first word.
const RESYNC_LOOKAHEAD: usize = 500;

/// Move transcript words along with blocks that were dragged or stretched.
///
/// Each block's text is matched against the next run of words; matched words
/// are rescaled so their relative spacing is kept inside the block. Words of
/// unmatched blocks keep their timings.
pub fn resync_words_to_blocks(words: &mut [Word], blocks: &[SubtitleBlock]) {
    if words.is_empty() || blocks.is_empty() {
        return;
    }
    let normalized: Vec<String> = words.iter().map(|w| normalize(&w.text)).collect();
    let mut cursor = 0;

    for block in blocks {
        let tokens: Vec<String> = block
            .text
            .split_whitespace()
            .map(normalize)
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            continue;
        }

        let limit = words.len().min(cursor + RESYNC_LOOKAHEAD);
        let found = (cursor..limit).find(|&i| {
            i + tokens.len() <= words.len()
                && tokens
                    .iter()
                    .zip(&normalized[i..])
                    .all(|(token, word)| token == word)
        });
        let Some(first) = found else {
            continue;
        };
        let last = first + tokens.len() - 1;

        let block_start = block.start.as_secs_f64();
        let duration = (block.end.as_secs_f64() - block_start).max(0.01);
        let orig_start = words[first].start;
        let orig_duration = (words[last].end - orig_start).max(0.01);
        let scale = duration / orig_duration;

        for word in &mut words[first..=last] {
            let rel_start = word.start - orig_start;
            let rel_end = word.end - orig_start;
            word.start = block_start + rel_start * scale;
            word.end = block_start + rel_end * scale;
        }
        cursor = last + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn block(start_ms: u64, end_ms: u64, text: &str) -> SubtitleBlock {
        SubtitleBlock::new(Timestamp::from_millis(start_ms), Timestamp::from_millis(end_ms), text)
    }

    fn word(start: f64, end: f64, text: &str) -> Word {
        Word {
            start,
            end,
            text: text.into(),
        }
    }

    #[test]
    fn test_matching_counts_use_transcript_timings() {
        let blocks = [block(1000, 3000, "hello world")];
        let words = [word(1.1, 1.6, "Hello,"), word(1.8, 2.9, "world")];

        let lines = build_karaoke_lines(&blocks, &words, DivergencePolicy::Plain);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_highlighted());
        assert_eq!(lines[0].words[0].start.as_millis(), 1100);
        assert_eq!(lines[0].words[1].end.as_millis(), 2900);
        assert_eq!(lines[0].words[0].text, "hello");
    }

    #[rstest]
    #[case(DivergencePolicy::Even, vec![(0, 1000), (1000, 2000)])]
    #[case(DivergencePolicy::ByLength, vec![(0, 500), (500, 2000)])]
    fn test_divergent_block_policies(#[case] policy: DivergencePolicy, #[case] expected: Vec<(u64, u64)>) {
        // The edited block has two words, the transcript three.
        let blocks = [block(0, 2000, "a bcd")];
        let words = [word(0.1, 0.4, "a"), word(0.5, 0.9, "b"), word(1.0, 1.9, "c")];

        let lines = build_karaoke_lines(&blocks, &words, policy);
        let timings: Vec<(u64, u64)> = lines[0]
            .words
            .iter()
            .map(|w| (w.start.as_millis(), w.end.as_millis()))
            .collect();
        assert_eq!(timings, expected);
    }

    #[test]
    fn test_plain_policy_drops_highlighting() {
        let blocks = [block(0, 2000, "edited text here")];
        let lines = build_karaoke_lines(&blocks, &[word(0.0, 1.0, "x")], DivergencePolicy::Plain);
        assert!(!lines[0].is_highlighted());
        assert_eq!(lines[0].text, "edited text here");
    }

    #[test]
    fn test_resync_follows_moved_block() {
        let mut words = vec![word(1.0, 1.5, "one"), word(1.5, 2.0, "two"), word(5.0, 6.0, "three")];
        // First block moved 10s later and stretched to twice its length.
        let blocks = [block(11_000, 13_000, "One two"), block(5000, 6000, "three")];

        resync_words_to_blocks(&mut words, &blocks);
        assert!((words[0].start - 11.0).abs() < 1e-9);
        assert!((words[1].start - 12.0).abs() < 1e-9);
        assert!((words[1].end - 13.0).abs() < 1e-9);
        assert!((words[2].start - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_resync_skips_unmatched_text() {
        let mut words = vec![word(1.0, 2.0, "hello")];
        resync_words_to_blocks(&mut words, &[block(8000, 9000, "goodbye")]);
        assert_eq!(words[0].start, 1.0);
    }

    #[test]
    fn test_policy_parses_from_env_value() {
        assert_eq!("by_length".parse::<DivergencePolicy>().unwrap(), DivergencePolicy::ByLength);
        assert!("sideways".parse::<DivergencePolicy>().is_err());
    }
}
