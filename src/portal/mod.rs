//! Portal client capability boundary.
//!
//! The engine never drives pages itself. It opens a [`PortalSession`]
//! through a [`PortalConnector`], uses the four capabilities (login, read
//! punches, submit, snapshot) and closes the session again. The bundled
//! [`driver`] adapter forwards those calls to an external browser
//! automation process.

pub mod driver;
pub mod protocol;

use crate::credentials::Credentials;
use crate::error::PortalError;
use crate::schedule::ClockTime;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A punch already recorded on the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObservedPunch {
    pub date: NaiveDate,
    pub time: ClockTime,
}

impl ObservedPunch {
    pub fn new(date: NaiveDate, time: ClockTime) -> Self {
        Self { date, time }
    }

    /// Parse the portal's `DD/MM` + `HH:MM` pair.
    ///
    /// The portal omits the year; it is taken from `today`, except that a
    /// December punch read in January belongs to the previous year.
    /// Returns `None` for anything malformed.
    #[must_use]
    pub fn from_portal(date: &str, time: &str, today: NaiveDate) -> Option<Self> {
        let time = ClockTime::parse_lenient(time)?;
        let (day, month) = date.trim().split_once('/')?;
        let day: u32 = day.trim().parse().ok()?;
        let month: u32 = month.trim().parse().ok()?;
        let year = if month == 12 && today.month() == 1 {
            today.year() - 1
        } else {
            today.year()
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(Self { date, time })
    }
}

impl fmt::Display for ObservedPunch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date.format("%d/%m"), self.time)
    }
}

/// Diagnostic capture of the portal page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotArtifact {
    /// Image file written by the driver.
    pub path: PathBuf,
}

/// Launches portal sessions.
#[async_trait]
pub trait PortalConnector: Send + Sync {
    /// Acquire a fresh session (e.g. launch a browser).
    async fn open_session(&self) -> Result<Box<dyn PortalSession>, PortalError>;
}

/// One live portal session. At most one is open at any time.
#[async_trait]
pub trait PortalSession: Send {
    /// Authenticate with the employee registration number and password.
    async fn login(&mut self, credentials: &Credentials) -> Result<(), PortalError>;

    /// Punches currently listed by the portal. An empty list is valid.
    async fn read_todays_punches(
        &mut self,
        today: NaiveDate,
    ) -> Result<Vec<ObservedPunch>, PortalError>;

    /// Press the punch button once.
    async fn submit_punch(&mut self) -> Result<(), PortalError>;

    /// Capture a diagnostic image of the current page.
    async fn snapshot(&mut self) -> Result<SnapshotArtifact, PortalError>;

    /// Tear the session down. Best-effort.
    async fn close(&mut self) -> Result<(), PortalError>;
}

/// Observed punches for `date`, sorted chronologically.
#[must_use]
pub fn times_on(observed: &[ObservedPunch], date: NaiveDate) -> Vec<ClockTime> {
    let mut times: Vec<ClockTime> = observed
        .iter()
        .filter(|p| p.date == date)
        .map(|p| p.time)
        .collect();
    times.sort();
    times
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_portal_pair_with_current_year() {
        let punch = ObservedPunch::from_portal("03/03", "08:07", date(2025, 3, 3)).unwrap();
        assert_eq!(punch.date, date(2025, 3, 3));
        assert_eq!(punch.time.to_string(), "08:07");
        assert_eq!(punch.to_string(), "03/03 08:07");
    }

    #[test]
    fn december_punch_read_in_january_is_previous_year() {
        let punch = ObservedPunch::from_portal("31/12", "17:00", date(2026, 1, 1)).unwrap();
        assert_eq!(punch.date, date(2025, 12, 31));
    }

    #[test]
    fn malformed_pairs_are_rejected() {
        let today = date(2025, 3, 3);
        assert!(ObservedPunch::from_portal("", "08:00", today).is_none());
        assert!(ObservedPunch::from_portal("32/01", "08:00", today).is_none());
        assert!(ObservedPunch::from_portal("03/03", "--:--", today).is_none());
    }

    #[test]
    fn times_on_filters_by_date_and_sorts() {
        let d1 = date(2025, 3, 3);
        let d2 = date(2025, 3, 4);
        let observed = vec![
            ObservedPunch::new(d1, "12:01".parse().unwrap()),
            ObservedPunch::new(d2, "08:00".parse().unwrap()),
            ObservedPunch::new(d1, "08:03".parse().unwrap()),
        ];
        let times = times_on(&observed, d1);
        assert_eq!(
            times.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec!["08:03", "12:01"]
        );
    }
}
