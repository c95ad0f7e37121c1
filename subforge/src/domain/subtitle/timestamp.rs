use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// A subtitle timestamp with millisecond precision.
///
/// Serialized as `HH:MM:SS,mmm`. Parsing a canonical string and formatting it
/// again yields the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Round fractional seconds to the nearest millisecond. Negative and
    /// non-finite values clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        Self((secs * 1000.0).round() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    fn parts(&self) -> (u64, u64, u64, u64) {
        let ms = self.0 % 1000;
        let total_secs = self.0 / 1000;
        (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60, ms)
    }

    /// `HH:MM:SS.mmm`, as used by WebVTT.
    pub fn to_vtt(&self) -> String {
        let (h, m, s, ms) = self.parts();
        format!("{h:02}:{m:02}:{s:02}.{ms:03}")
    }

    /// `H:MM:SS.cc`, as used by ASS dialogue lines.
    pub fn to_ass(&self) -> String {
        let (h, m, s, ms) = self.parts();
        format!("{h}:{m:02}:{s:02}.{:02}", ms / 10)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s, ms) = self.parts();
        write!(f, "{h:02}:{m:02}:{s:02},{ms:03}")
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    /// Accepts `HH:MM:SS,mmm`, `HH:MM:SS.mmm`, `MM:SS,mmm` and whole seconds
    /// without a fraction.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::validation(format!("Invalid timestamp '{raw}'"));
        let raw_trimmed = raw.trim();

        let (clock, frac) = match raw_trimmed.rsplit_once([',', '.']) {
            Some((clock, frac)) => (clock, frac),
            None => (raw_trimmed, "0"),
        };
        if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        // "5" means 500 ms, "05" means 50 ms.
        let ms: u64 = format!("{frac:0<3}").parse().map_err(|_| invalid())?;

        let fields: Vec<&str> = clock.split(':').collect();
        let numbers = fields
            .iter()
            .map(|f| {
                if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                    Err(invalid())
                } else {
                    f.parse::<u64>().map_err(|_| invalid())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (h, m, s) = match numbers.as_slice() {
            [h, m, s] => (*h, *m, *s),
            [m, s] => (0, *m, *s),
            _ => return Err(invalid()),
        };
        if m >= 60 || s >= 60 {
            return Err(invalid());
        }

        h.checked_mul(3600)
            .and_then(|secs| secs.checked_add(m * 60 + s))
            .and_then(|secs| secs.checked_mul(1000))
            .and_then(|millis| millis.checked_add(ms))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
