//! Schedule reconciliation.
//!
//! Pure functions that line up the desired schedule with the punches the
//! portal already shows:
//!
//! 1. Build the day's slots in fixed order (`entrada1` → `saida2`).
//! 2. Zip the chronologically sorted observed punches positionally onto the
//!    slots: the Nth punch satisfies the Nth configured slot.
//! 3. Take the last satisfied slot as the anchor and shift every later slot
//!    by `observed - scheduled` of that anchor. The delta always comes from
//!    the anchor's originally scheduled time, so drift never compounds.
//! 4. The first unsatisfied slot is next due.
//!
//! Slots given up for the day (their window passed unpunched) are waived:
//! they take no part in the zip, so a later punch lands on the slot it was
//! made for instead of the first empty position.
//!
//! Nothing here touches the network.

use crate::portal::{ObservedPunch, times_on};
use crate::schedule::{ClockTime, DayOfWeek, DayPlan, Schedule, SlotId};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;

/// One configured punch position after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PunchSlot {
    pub id: SlotId,
    /// Time as configured in the schedule.
    pub scheduled_time: ClockTime,
    /// Target time after delta adjustment. Equals `scheduled_time` for
    /// slots at or before the anchor.
    pub ideal_time: ClockTime,
    /// Punch matched to this slot by position.
    pub observed_time: Option<ClockTime>,
    pub satisfied: bool,
    /// Given up for the day; never zipped and never due.
    pub waived: bool,
}

impl PunchSlot {
    fn new(id: SlotId, scheduled_time: ClockTime) -> Self {
        Self {
            id,
            scheduled_time,
            ideal_time: scheduled_time,
            observed_time: None,
            satisfied: false,
            waived: false,
        }
    }
}

/// A day's slots synced against observed punches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayReconciliation {
    pub date: NaiveDate,
    pub slots: Vec<PunchSlot>,
    /// Delta in minutes applied after the anchor, if a punch was observed.
    pub delta_minutes: Option<i32>,
    /// Slots whose shifted time had to be clamped into the day.
    pub clamped: Vec<SlotId>,
}

impl DayReconciliation {
    /// First unsatisfied slot, in order.
    #[must_use]
    pub fn next_due(&self) -> Option<&PunchSlot> {
        self.slots.iter().find(|slot| !slot.satisfied && !slot.waived)
    }

    /// Number of satisfied slots.
    #[must_use]
    pub fn satisfied_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.satisfied).count()
    }

    /// The anchor: last satisfied slot.
    #[must_use]
    pub fn anchor(&self) -> Option<&PunchSlot> {
        self.slots.iter().rev().find(|slot| slot.satisfied)
    }
}

/// Sync a day's plan with the punches observed for that day.
///
/// Returns `None` for disabled days and days without any usable slot.
/// `observed` need not be sorted.
#[must_use]
pub fn reconcile_day(
    date: NaiveDate,
    plan: &DayPlan,
    observed: &[ClockTime],
) -> Option<DayReconciliation> {
    reconcile_day_waiving(date, plan, observed, &[])
}

/// [`reconcile_day`] with some slots waived.
///
/// Observed punches are zipped onto the remaining slots only.
#[must_use]
pub fn reconcile_day_waiving(
    date: NaiveDate,
    plan: &DayPlan,
    observed: &[ClockTime],
    waived: &[SlotId],
) -> Option<DayReconciliation> {
    let mut slots: Vec<PunchSlot> = plan
        .configured_slots()
        .into_iter()
        .map(|(id, time)| PunchSlot {
            waived: waived.contains(&id),
            ..PunchSlot::new(id, time)
        })
        .collect();
    if slots.is_empty() {
        return None;
    }

    let mut sorted = observed.to_vec();
    sorted.sort();

    for (slot, time) in slots.iter_mut().filter(|slot| !slot.waived).zip(&sorted) {
        slot.observed_time = Some(*time);
        slot.satisfied = true;
    }

    let mut delta_minutes = None;
    let mut clamped = Vec::new();

    let anchor_index = slots.iter().rposition(|slot| slot.satisfied);
    if let Some(anchor_index) = anchor_index {
        let anchor = &slots[anchor_index];
        if let Some(observed) = anchor.observed_time {
            let delta = observed.minutes_since(anchor.scheduled_time);
            delta_minutes = Some(delta);
            for slot in slots.iter_mut().skip(anchor_index + 1) {
                let shifted = slot.scheduled_time.shift(delta);
                slot.ideal_time = shifted.time;
                if shifted.clamped {
                    clamped.push(slot.id);
                }
            }
        }
    }

    Some(DayReconciliation {
        date,
        slots,
        delta_minutes,
        clamped,
    })
}

/// The single punch the heartbeat waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextPunch {
    pub day: DayOfWeek,
    pub slot: SlotId,
    pub time: ClockTime,
    pub date_time: NaiveDateTime,
}

impl NextPunch {
    fn from_slot(date: NaiveDate, slot: &PunchSlot) -> Self {
        Self {
            day: DayOfWeek::of(date),
            slot: slot.id,
            time: slot.ideal_time,
            date_time: date.and_time(slot.ideal_time.to_naive_time()),
        }
    }

    /// Calendar date of the punch.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date_time.date()
    }
}

/// A slot of today that can no longer be punched on time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissedSlot {
    pub slot: SlotId,
    pub time: ClockTime,
}

/// Outcome of planning against the whole schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PunchPlan {
    /// Today's reconciliation, when today is an active day.
    pub today: Option<DayReconciliation>,
    /// Next punch to perform, or `None` when nothing is pending.
    pub next: Option<NextPunch>,
    /// Unsatisfied slots of today whose window already passed.
    pub missed: Vec<MissedSlot>,
}

/// Picks the next due punch across days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    /// Days after today to scan when nothing is left today.
    pub lookahead_days: u32,
    /// How late a slot may be and still count as due.
    pub tolerance: Duration,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            lookahead_days: 6,
            tolerance: Duration::seconds(10),
        }
    }
}

impl Reconciler {
    /// Plan the next punch.
    ///
    /// Today's first unsatisfied slot is chosen unless its (adjusted) time
    /// is already more than the tolerance in the past; such slots are
    /// reported in [`PunchPlan::missed`] and skipped. When today has nothing
    /// left, up to `lookahead_days` following days are scanned for the
    /// first active day, matched against observed punches for that date.
    #[must_use]
    pub fn plan(
        &self,
        schedule: &Schedule,
        observed: &[ObservedPunch],
        now: NaiveDateTime,
    ) -> PunchPlan {
        self.plan_waiving(schedule, observed, now, &[])
    }

    /// [`Reconciler::plan`] with today's `waived` slots left out.
    ///
    /// A run passes back every slot it was told is missed, so the punches
    /// it makes afterwards keep their own positions.
    #[must_use]
    pub fn plan_waiving(
        &self,
        schedule: &Schedule,
        observed: &[ObservedPunch],
        now: NaiveDateTime,
        waived: &[SlotId],
    ) -> PunchPlan {
        let today = now.date();
        let earliest = now - self.tolerance;

        let mut plan = PunchPlan {
            today: schedule.plan_for(today).and_then(|day| {
                reconcile_day_waiving(today, day, &times_on(observed, today), waived)
            }),
            ..PunchPlan::default()
        };

        if let Some(day) = &plan.today {
            for slot in day
                .slots
                .iter()
                .filter(|slot| !slot.satisfied && !slot.waived)
            {
                let candidate = NextPunch::from_slot(today, slot);
                if candidate.date_time >= earliest {
                    plan.next = Some(candidate);
                    break;
                }
                plan.missed.push(MissedSlot {
                    slot: slot.id,
                    time: slot.ideal_time,
                });
            }
        }

        if plan.next.is_some() {
            return plan;
        }

        for offset in 1..=i64::from(self.lookahead_days) {
            let date = today + Duration::days(offset);
            let Some(day_plan) = schedule.plan_for(date) else {
                continue;
            };
            let Some(day) = reconcile_day(date, day_plan, &times_on(observed, date)) else {
                continue;
            };
            if let Some(slot) = day.next_due() {
                plan.next = Some(NextPunch::from_slot(date, slot));
                break;
            }
        }

        plan
    }
}

/// `true` when `time` is already recorded on `date`.
#[must_use]
pub fn is_registered(observed: &[ObservedPunch], date: NaiveDate, time: ClockTime) -> bool {
    observed.iter().any(|p| p.date == date && p.time == time)
}

/// Decide whether a submitted punch now shows on the portal.
///
/// Accepts when the exact target appears, or when the day's punch count
/// grew and one of the new times lies within `tolerance_mins` of the
/// target. Returns the matching observed time.
#[must_use]
pub fn confirm_registration(
    before: &[ObservedPunch],
    after: &[ObservedPunch],
    date: NaiveDate,
    target: ClockTime,
    tolerance_mins: i32,
) -> Option<ClockTime> {
    if is_registered(after, date, target) {
        return Some(target);
    }

    let before_times = times_on(before, date);
    let after_times = times_on(after, date);
    if after_times.len() <= before_times.len() {
        return None;
    }

    after_times
        .into_iter()
        .filter(|time| !before_times.contains(time))
        .find(|time| time.minutes_since(target).abs() <= tolerance_mins)
}
