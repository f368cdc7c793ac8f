//! Time-of-day values used by punch slots.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of minutes in a day.
pub const MINUTES_PER_DAY: i32 = 24 * 60;

/// A wall-clock time of day with minute precision.
///
/// Stored as minutes since midnight; always in `0..MINUTES_PER_DAY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(u16);

/// Result of shifting a [`ClockTime`] by a signed number of minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftedTime {
    /// The shifted time, clamped into the same day.
    pub time: ClockTime,
    /// `true` when the raw shift fell outside `00:00..=23:59`.
    pub clamped: bool,
}

impl ClockTime {
    /// Midnight.
    pub const MIDNIGHT: Self = Self(0);

    /// Last representable minute of the day.
    pub const END_OF_DAY: Self = Self((MINUTES_PER_DAY - 1) as u16);

    /// Build from hour and minute, rejecting out-of-range values.
    #[must_use]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self((hour * 60 + minute) as u16))
    }

    /// Build from minutes since midnight.
    #[must_use]
    pub fn from_minutes(minutes: i32) -> Option<Self> {
        if (0..MINUTES_PER_DAY).contains(&minutes) {
            Some(Self(minutes as u16))
        } else {
            None
        }
    }

    /// Lenient parse used on portal and schedule strings.
    ///
    /// Accepts `HH:MM` and `H:MM` with surrounding whitespace. Returns `None`
    /// for empty or malformed input so callers can treat it as absent.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (h, m) = trimmed.split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        let hour: u32 = h.parse().ok()?;
        let minute: u32 = m.parse().ok()?;
        Self::from_hm(hour, minute)
    }

    /// Minutes since midnight.
    #[must_use]
    pub fn minutes(self) -> i32 {
        i32::from(self.0)
    }

    /// Hour component.
    #[must_use]
    pub fn hour(self) -> u32 {
        u32::from(self.0 / 60)
    }

    /// Minute component.
    #[must_use]
    pub fn minute(self) -> u32 {
        u32::from(self.0 % 60)
    }

    /// Signed difference `self - other` in minutes, same day.
    #[must_use]
    pub fn minutes_since(self, other: Self) -> i32 {
        self.minutes() - other.minutes()
    }

    /// Shift by `delta` minutes without crossing midnight.
    ///
    /// Results below `00:00` clamp to `00:00`; results past `23:59` clamp
    /// to `23:59`.
    #[must_use]
    pub fn shift(self, delta: i32) -> ShiftedTime {
        let raw = self.minutes() + delta;
        let clamped_minutes = raw.clamp(0, MINUTES_PER_DAY - 1);
        ShiftedTime {
            time: Self(clamped_minutes as u16),
            clamped: clamped_minutes != raw,
        }
    }

    /// Convert to a `chrono::NaiveTime`.
    #[must_use]
    pub fn to_naive_time(self) -> chrono::NaiveTime {
        chrono::NaiveTime::from_hms_opt(self.hour(), self.minute(), 0)
            .unwrap_or(chrono::NaiveTime::MIN)
    }

    /// Truncate a `chrono::NaiveTime` to minute precision.
    #[must_use]
    pub fn from_naive_time(time: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for ClockTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_lenient(s).ok_or_else(|| format!("invalid time of day: {s:?} (expected HH:MM)"))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
