use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Vertical placement of the subtitle lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Top,
    Middle,
    #[default]
    Bottom,
}

impl Position {
    /// ASS numpad alignment, horizontally centred.
    pub fn ass_alignment(&self) -> u8 {
        match self {
            Self::Bottom => 2,
            Self::Middle => 5,
            Self::Top => 8,
        }
    }
}

/// How subtitles are drawn onto the video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleConfig {
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default)]
    pub font_bold: bool,
    #[serde(default)]
    pub font_italic: bool,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_highlight_color")]
    pub highlight_color: String,
    #[serde(default = "default_outline_color")]
    pub outline_color: String,
    #[serde(default = "default_true")]
    pub outline_enabled: bool,
    #[serde(default = "default_outline_size")]
    pub outline_size: f32,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default)]
    pub background_enabled: bool,
    /// 0.0 (transparent) to 1.0 (opaque).
    #[serde(default = "default_background_opacity")]
    pub background_opacity: f32,
    #[serde(default)]
    pub position: Position,
    #[serde(default = "default_margin_v")]
    pub margin_v: u32,
    #[serde(default = "default_max_words_per_line")]
    pub max_words_per_line: usize,
    #[serde(default = "default_play_res_x")]
    pub play_res_x: u32,
    #[serde(default = "default_play_res_y")]
    pub play_res_y: u32,
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_font_size() -> u32 {
    48
}

fn default_text_color() -> String {
    "#FFFFFF".to_string()
}

fn default_highlight_color() -> String {
    "#FFD400".to_string()
}

fn default_outline_color() -> String {
    "#000000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_outline_size() -> f32 {
    2.0
}

fn default_background_color() -> String {
    "#000000".to_string()
}

fn default_background_opacity() -> f32 {
    0.6
}

fn default_margin_v() -> u32 {
    60
}

fn default_max_words_per_line() -> usize {
    6
}

fn default_play_res_x() -> u32 {
    1920
}

fn default_play_res_y() -> u32 {
    1080
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            font_family: default_font_family(),
            font_size: default_font_size(),
            font_bold: false,
            font_italic: false,
            text_color: default_text_color(),
            highlight_color: default_highlight_color(),
            outline_color: default_outline_color(),
            outline_enabled: true,
            outline_size: default_outline_size(),
            background_color: default_background_color(),
            background_enabled: false,
            background_opacity: default_background_opacity(),
            position: Position::Bottom,
            margin_v: default_margin_v(),
            max_words_per_line: default_max_words_per_line(),
            play_res_x: default_play_res_x(),
            play_res_y: default_play_res_y(),
        }
    }
}

impl StyleConfig {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("text_color", &self.text_color),
            ("highlight_color", &self.highlight_color),
            ("outline_color", &self.outline_color),
            ("background_color", &self.background_color),
        ] {
            parse_hex_rgb(value)
                .ok_or_else(|| Error::validation(format!("{field} must be #RRGGBB, got '{value}'")))?;
        }
        if self.font_family.trim().is_empty() || self.font_family.contains([',', '\n', '\r']) {
            return Err(Error::validation("font_family is empty or contains ',' or newlines"));
        }
        if !(8..=300).contains(&self.font_size) {
            return Err(Error::validation("font_size must be between 8 and 300"));
        }
        if !(0.0..=1.0).contains(&self.background_opacity) {
            return Err(Error::validation("background_opacity must be between 0 and 1"));
        }
        if self.max_words_per_line == 0 {
            return Err(Error::validation("max_words_per_line must be at least 1"));
        }
        if self.play_res_x == 0 || self.play_res_y == 0 {
            return Err(Error::validation("render resolution must be non-zero"));
        }
        Ok(())
    }

    /// Convert `#RRGGBB` plus opacity into an ASS `&HAABBGGRR` colour.
    ///
    /// ASS alpha is inverted: `00` is opaque.
    pub fn ass_color(hex: &str, opacity: f32) -> String {
        let (r, g, b) = parse_hex_rgb(hex).unwrap_or((255, 255, 255));
        let alpha = ((1.0 - opacity.clamp(0.0, 1.0)) * 255.0).round() as u8;
        format!("&H{alpha:02X}{b:02X}{g:02X}{r:02X}")
    }
}

/// A named style offered to the editor as a starting point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StylePreset {
    pub id: &'static str,
    pub name: &'static str,
    pub style: StyleConfig,
}

struct PresetSpec {
    id: &'static str,
    name: &'static str,
    font_family: &'static str,
    font_size: u32,
    highlight_color: &'static str,
    outline: Option<(&'static str, f32)>,
    background: Option<(&'static str, f32)>,
    margin_v: u32,
    max_words_per_line: usize,
}

const BUILTIN_PRESETS: &[PresetSpec] = &[
    PresetSpec {
        id: "builtin:social-classic",
        name: "Social Classic",
        font_family: "Montserrat",
        font_size: 48,
        highlight_color: "#FFFF00",
        outline: Some(("#000000", 4.0)),
        background: None,
        margin_v: 50,
        max_words_per_line: 7,
    },
    PresetSpec {
        id: "builtin:social-box",
        name: "Social Box",
        font_family: "Montserrat",
        font_size: 46,
        highlight_color: "#FFFF00",
        outline: None,
        background: Some(("#000000", 0.55)),
        margin_v: 60,
        max_words_per_line: 7,
    },
    PresetSpec {
        id: "builtin:clean-bold",
        name: "Clean Bold",
        font_family: "Montserrat",
        font_size: 48,
        highlight_color: "#FFD400",
        outline: Some(("#111111", 3.0)),
        background: None,
        margin_v: 50,
        max_words_per_line: 7,
    },
    PresetSpec {
        id: "builtin:modern-soft",
        name: "Modern Soft",
        font_family: "Manrope",
        font_size: 46,
        highlight_color: "#A7F3D0",
        outline: None,
        background: Some(("#0F172A", 0.45)),
        margin_v: 60,
        max_words_per_line: 8,
    },
    PresetSpec {
        id: "builtin:headline-pop",
        name: "Headline Pop",
        font_family: "Bebas Neue",
        font_size: 56,
        highlight_color: "#F97316",
        outline: Some(("#000000", 4.0)),
        background: None,
        margin_v: 55,
        max_words_per_line: 7,
    },
];

/// The built-in presets, in display order.
pub fn builtin_presets() -> Vec<StylePreset> {
    BUILTIN_PRESETS
        .iter()
        .map(|spec| {
            let mut style = StyleConfig {
                font_family: spec.font_family.to_string(),
                font_size: spec.font_size,
                font_bold: true,
                highlight_color: spec.highlight_color.to_string(),
                outline_enabled: spec.outline.is_some(),
                background_enabled: spec.background.is_some(),
                margin_v: spec.margin_v,
                max_words_per_line: spec.max_words_per_line,
                ..StyleConfig::default()
            };
            if let Some((color, size)) = spec.outline {
                style.outline_color = color.to_string();
                style.outline_size = size;
            }
            if let Some((color, opacity)) = spec.background {
                style.background_color = color.to_string();
                style.background_opacity = opacity;
            }
            StylePreset {
                id: spec.id,
                name: spec.name,
                style,
            }
        })
        .collect()
}

fn parse_hex_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_presets_are_valid() {
        let presets = builtin_presets();
        assert_eq!(presets.len(), 5);
        for preset in &presets {
            preset.style.validate().unwrap();
            assert!(preset.id.starts_with("builtin:"));
        }
        let boxed = presets.iter().find(|p| p.id == "builtin:social-box").unwrap();
        assert!(boxed.style.background_enabled);
        assert!(!boxed.style.outline_enabled);
        assert_eq!(boxed.style.background_opacity, 0.55);
    }

    #[test]
    fn test_ass_color_conversion() {
        assert_eq!(StyleConfig::ass_color("#FF8000", 1.0), "&H000080FF");
        assert_eq!(StyleConfig::ass_color("#000000", 0.0), "&HFF000000");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let style: StyleConfig = serde_json::from_str(r#"{"font_size": 64}"#).unwrap();
        assert_eq!(style.font_size, 64);
        assert_eq!(style.font_family, "Arial");
        assert_eq!(style.position, Position::Bottom);
        style.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_colors() {
        let style = StyleConfig {
            text_color: "white".into(),
            ..Default::default()
        };
        assert!(style.validate().is_err());

        let style = StyleConfig {
            font_family: "Arial,Bold".into(),
            ..Default::default()
        };
        assert!(style.validate().is_err());
    }
}
