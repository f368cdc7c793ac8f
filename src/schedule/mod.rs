//! Desired punch schedule.
//!
//! A [`Schedule`] maps calendar days to a [`DayPlan`] of up to four named
//! punch slots. Weekly schedules repeat by [`DayOfWeek`]; monthly schedules
//! list explicit dates (useful for shift rosters and holidays).

pub mod store;
pub mod time;

pub use store::{FileScheduleStore, ScheduleStore, StaticSchedule};
pub use time::{ClockTime, ShiftedTime};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of punch slots in a day.
pub const MAX_SLOTS_PER_DAY: usize = 4;

/// A named punch position within a day, in fixed chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotId {
    /// First clock-in.
    Entrada1,
    /// First clock-out (lunch).
    Saida1,
    /// Second clock-in (back from lunch).
    Entrada2,
    /// Final clock-out.
    Saida2,
}

impl SlotId {
    /// All slots in punch order.
    pub const ALL: [Self; MAX_SLOTS_PER_DAY] =
        [Self::Entrada1, Self::Saida1, Self::Entrada2, Self::Saida2];

    /// Stable identifier (`"entrada1"`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entrada1 => "entrada1",
            Self::Saida1 => "saida1",
            Self::Entrada2 => "entrada2",
            Self::Saida2 => "saida2",
        }
    }

    /// Human label for notifications.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Entrada1 => "Entrada",
            Self::Saida1 => "Saída para almoço",
            Self::Entrada2 => "Volta do almoço",
            Self::Saida2 => "Saída",
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Day of the week used as a schedule key.
///
/// Config files accept English names and Portuguese aliases; the core only
/// ever compares enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    #[serde(alias = "segunda", alias = "segunda-feira")]
    Monday,
    #[serde(alias = "terca", alias = "terça", alias = "terca-feira", alias = "terça-feira")]
    Tuesday,
    #[serde(alias = "quarta", alias = "quarta-feira")]
    Wednesday,
    #[serde(alias = "quinta", alias = "quinta-feira")]
    Thursday,
    #[serde(alias = "sexta", alias = "sexta-feira")]
    Friday,
    #[serde(alias = "sabado", alias = "sábado")]
    Saturday,
    #[serde(alias = "domingo")]
    Sunday,
}

impl DayOfWeek {
    /// All days, Monday first.
    pub const ALL: [Self; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    /// Day of week for a calendar date.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        Self::from(date.weekday())
    }

    /// Portuguese display name, for UI and notifications only.
    #[must_use]
    pub fn display_name_pt(self) -> &'static str {
        match self {
            Self::Monday => "Segunda-feira",
            Self::Tuesday => "Terça-feira",
            Self::Wednesday => "Quarta-feira",
            Self::Thursday => "Quinta-feira",
            Self::Friday => "Sexta-feira",
            Self::Saturday => "Sábado",
            Self::Sunday => "Domingo",
        }
    }

    /// Resolve a Portuguese display name, with or without accents or the
    /// `-feira` suffix.
    #[must_use]
    pub fn from_display_name(name: &str) -> Option<Self> {
        let folded: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' | 'à' | 'â' | 'ã' => 'a',
                'é' | 'ê' => 'e',
                'í' => 'i',
                'ó' | 'ô' | 'õ' => 'o',
                'ú' => 'u',
                'ç' => 'c',
                other => other,
            })
            .collect();
        let stem = folded
            .strip_suffix("-feira")
            .or_else(|| folded.strip_suffix(" feira"))
            .unwrap_or(&folded);
        match stem {
            "segunda" => Some(Self::Monday),
            "terca" => Some(Self::Tuesday),
            "quarta" => Some(Self::Wednesday),
            "quinta" => Some(Self::Thursday),
            "sexta" => Some(Self::Friday),
            "sabado" => Some(Self::Saturday),
            "domingo" => Some(Self::Sunday),
            _ => None,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

/// Desired punches for one day.
///
/// Slot times are kept as the raw configured strings; an empty string means
/// the slot is not configured and a malformed one is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DayPlan {
    /// Holiday / day off. A disabled day has no active slots.
    pub disabled: bool,
    pub entrada1: String,
    pub saida1: String,
    pub entrada2: String,
    pub saida2: String,
}

impl DayPlan {
    /// Plan with the given times assigned to slots in order.
    #[must_use]
    pub fn with_times(times: &[&str]) -> Self {
        let mut plan = Self::default();
        for (slot, time) in SlotId::ALL.iter().zip(times) {
            *plan.slot_mut(*slot) = (*time).to_owned();
        }
        plan
    }

    /// A disabled (holiday) plan.
    #[must_use]
    pub fn day_off() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Raw configured string for a slot.
    #[must_use]
    pub fn slot(&self, slot: SlotId) -> &str {
        match slot {
            SlotId::Entrada1 => &self.entrada1,
            SlotId::Saida1 => &self.saida1,
            SlotId::Entrada2 => &self.entrada2,
            SlotId::Saida2 => &self.saida2,
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut String {
        match slot {
            SlotId::Entrada1 => &mut self.entrada1,
            SlotId::Saida1 => &mut self.saida1,
            SlotId::Entrada2 => &mut self.entrada2,
            SlotId::Saida2 => &mut self.saida2,
        }
    }

    /// Configured, parseable slots in fixed order. Empty for disabled days.
    #[must_use]
    pub fn configured_slots(&self) -> Vec<(SlotId, ClockTime)> {
        if self.disabled {
            return Vec::new();
        }
        SlotId::ALL
            .iter()
            .filter_map(|slot| ClockTime::parse_lenient(self.slot(*slot)).map(|t| (*slot, t)))
            .collect()
    }

    /// `true` when the day is enabled and has at least one usable slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.configured_slots().is_empty()
    }

    /// Slots whose non-empty configured value does not parse.
    #[must_use]
    pub fn malformed_slots(&self) -> Vec<SlotId> {
        SlotId::ALL
            .iter()
            .copied()
            .filter(|slot| {
                let raw = self.slot(*slot).trim();
                !raw.is_empty() && ClockTime::parse_lenient(raw).is_none()
            })
            .collect()
    }
}

/// How days are keyed in a [`Schedule`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    /// Same plan every week, keyed by weekday.
    #[default]
    Weekly,
    /// Explicit plan per calendar date.
    Monthly,
}

/// The desired punch plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub mode: ScheduleMode,
    pub weekly: BTreeMap<DayOfWeek, DayPlan>,
    pub monthly: BTreeMap<NaiveDate, DayPlan>,
}

impl Schedule {
    /// Weekly schedule from `(day, plan)` pairs.
    #[must_use]
    pub fn weekly(days: impl IntoIterator<Item = (DayOfWeek, DayPlan)>) -> Self {
        Self {
            mode: ScheduleMode::Weekly,
            weekly: days.into_iter().collect(),
            monthly: BTreeMap::new(),
        }
    }

    /// Monthly schedule from `(date, plan)` pairs.
    #[must_use]
    pub fn monthly(days: impl IntoIterator<Item = (NaiveDate, DayPlan)>) -> Self {
        Self {
            mode: ScheduleMode::Monthly,
            weekly: BTreeMap::new(),
            monthly: days.into_iter().collect(),
        }
    }

    /// Monday–Friday with the same plan, weekends off.
    #[must_use]
    pub fn workweek(plan: DayPlan) -> Self {
        Self::weekly(DayOfWeek::ALL.iter().map(|day| {
            let day_plan = match day {
                DayOfWeek::Saturday | DayOfWeek::Sunday => DayPlan::day_off(),
                _ => plan.clone(),
            };
            (*day, day_plan)
        }))
    }

    /// Plan for a calendar date, if any.
    #[must_use]
    pub fn plan_for(&self, date: NaiveDate) -> Option<&DayPlan> {
        match self.mode {
            ScheduleMode::Weekly => self.weekly.get(&DayOfWeek::of(date)),
            ScheduleMode::Monthly => self.monthly.get(&date),
        }
    }

    /// Human-readable problems with the configured times.
    #[must_use]
    pub fn validation_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        for (day, plan) in &self.weekly {
            for slot in plan.malformed_slots() {
                issues.push(format!(
                    "{}: {slot} has invalid time {:?}",
                    day.display_name_pt(),
                    plan.slot(slot)
                ));
            }
        }
        for (date, plan) in &self.monthly {
            for slot in plan.malformed_slots() {
                issues.push(format!("{date}: {slot} has invalid time {:?}", plan.slot(slot)));
            }
        }
        issues
    }
}
