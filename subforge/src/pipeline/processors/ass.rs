//! ASS script generation for burned-in subtitles.

use std::fmt::Write as _;

use super::karaoke::KaraokeLine;
use crate::domain::subtitle::StyleConfig;

const STYLE_FORMAT: &str = "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, \
OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";

const EVENT_FORMAT: &str =
    "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

/// Render `lines` as a complete ASS script.
///
/// Highlighted lines get `\k` tags; libass fills each word from the
/// secondary (text) colour to the primary (highlight) colour.
pub fn build_ass(lines: &[KaraokeLine], style: &StyleConfig) -> String {
    let karaoke = lines.iter().any(KaraokeLine::is_highlighted);
    let mut out = String::new();

    let _ = writeln!(out, "[Script Info]");
    let _ = writeln!(out, "ScriptType: v4.00+");
    let _ = writeln!(out, "PlayResX: {}", style.play_res_x);
    let _ = writeln!(out, "PlayResY: {}", style.play_res_y);
    let _ = writeln!(out, "WrapStyle: 0");
    let _ = writeln!(out, "ScaledBorderAndShadow: yes");
    let _ = writeln!(out);

    let _ = writeln!(out, "[V4+ Styles]");
    let _ = writeln!(out, "{STYLE_FORMAT}");
    let _ = writeln!(out, "{}", style_line(style, karaoke));
    let _ = writeln!(out);

    let _ = writeln!(out, "[Events]");
    let _ = writeln!(out, "{EVENT_FORMAT}");
    for line in lines {
        let text = if line.is_highlighted() {
            karaoke_text(line)
        } else {
            escape_text(&line.text)
        };
        let _ = writeln!(
            out,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            line.start.to_ass(),
            line.end.to_ass(),
            text
        );
    }
    out
}

fn style_line(style: &StyleConfig, karaoke: bool) -> String {
    let text = StyleConfig::ass_color(&style.text_color, 1.0);
    let highlight = StyleConfig::ass_color(&style.highlight_color, 1.0);
    let (primary, secondary) = if karaoke {
        (highlight, text)
    } else {
        (text.clone(), text)
    };

    // An opaque box (border style 3) is drawn in the outline colour.
    let (border_style, outline_colour, outline) = if style.background_enabled {
        (
            3,
            StyleConfig::ass_color(&style.background_color, style.background_opacity),
            style.outline_size.max(1.0),
        )
    } else {
        (
            1,
            StyleConfig::ass_color(&style.outline_color, 1.0),
            if style.outline_enabled { style.outline_size } else { 0.0 },
        )
    };
    let back = StyleConfig::ass_color(&style.background_color, style.background_opacity);

    format!(
        "Style: Default,{},{},{},{},{},{},{},{},0,0,100,100,0,0,{},{},0,{},20,20,{},1",
        style.font_family,
        style.font_size,
        primary,
        secondary,
        outline_colour,
        back,
        ass_bool(style.font_bold),
        ass_bool(style.font_italic),
        border_style,
        outline,
        style.position.ass_alignment(),
        style.margin_v,
    )
}

fn ass_bool(value: bool) -> i8 {
    if value { -1 } else { 0 }
}

/// Text with override braces removed and line breaks as `\N`.
fn escape_text(text: &str) -> String {
    text.replace(['{', '}'], "")
        .replace("\r\n", "\n")
        .replace('\n', "\\N")
}

fn karaoke_text(line: &KaraokeLine) -> String {
    let origin = line.start.as_millis();
    // Centiseconds since the line start, rounded, so durations never drift.
    let cs = |ms: u64| (ms.saturating_sub(origin) + 5) / 10;

    let mut out = String::new();
    let mut cursor = 0;
    for (i, word) in line.words.iter().enumerate() {
        let start = cs(word.start.as_millis());
        let end = cs(word.end.as_millis()).max(start);
        if start > cursor {
            let _ = write!(out, "{{\\k{}}}", start - cursor);
        }
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{{\\k{}}}{}", end - start, escape_text(&word.text));
        cursor = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subtitle::Timestamp;
    use crate::pipeline::processors::karaoke::KaraokeWord;

    fn plain(start: u64, end: u64, text: &str) -> KaraokeLine {
        KaraokeLine {
            start: Timestamp::from_millis(start),
            end: Timestamp::from_millis(end),
            text: text.into(),
            words: vec![],
        }
    }

    #[test]
    fn test_plain_script() {
        let ass = build_ass(&[plain(1000, 2500, "Hi {there}\nyou")], &StyleConfig::default());
        assert!(ass.contains("PlayResX: 1920"));
        assert!(ass.contains("Dialogue: 0,0:00:01.00,0:00:02.50,Default,,0,0,0,,Hi there\\Nyou"));
        // Plain renders use the text colour as primary.
        assert!(ass.contains("Style: Default,Arial,48,&H00FFFFFF,&H00FFFFFF,"));
    }

    #[test]
    fn test_karaoke_tags() {
        let word = |start: u64, end: u64, text: &str| KaraokeWord {
            text: text.into(),
            start: Timestamp::from_millis(start),
            end: Timestamp::from_millis(end),
        };
        let line = KaraokeLine {
            start: Timestamp::from_millis(1000),
            end: Timestamp::from_millis(3000),
            text: "one two".into(),
            words: vec![word(1200, 1700, "one"), word(1700, 2900, "two")],
        };
        let ass = build_ass(&[line], &StyleConfig::default());
        assert!(ass.contains(",,{\\k20}{\\k50}one {\\k120}two\n"));
        // Highlight colour #FFD400 is primary for karaoke.
        assert!(ass.contains("Style: Default,Arial,48,&H0000D4FF,&H00FFFFFF,"));
    }

    #[test]
    fn test_background_box() {
        let style = StyleConfig {
            background_enabled: true,
            background_opacity: 0.5,
            ..Default::default()
        };
        let ass = build_ass(&[plain(0, 1000, "x")], &style);
        let style_line = ass.lines().find(|l| l.starts_with("Style:")).unwrap();
        let fields: Vec<&str> = style_line.split(',').collect();
        assert_eq!(fields[15], "3");
        assert_eq!(fields[3], "&H00FFFFFF");
        assert_eq!(fields[5], "&H80000000");
    }
}
