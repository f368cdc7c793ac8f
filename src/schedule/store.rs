//! Read-only schedule sources consulted at cycle boundaries.

use super::Schedule;
use crate::error::{PontoError, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Source of the desired schedule.
///
/// The engine calls [`get`](ScheduleStore::get) once per reconciliation
/// cycle, so edits made between cycles are picked up without restarting.
pub trait ScheduleStore: Send + Sync {
    /// Current schedule.
    fn get(&self) -> Result<Schedule>;
}

/// A schedule fixed for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct StaticSchedule(pub Schedule);

impl ScheduleStore for StaticSchedule {
    fn get(&self) -> Result<Schedule> {
        Ok(self.0.clone())
    }
}

/// Schedule re-read from a TOML file on every cycle.
///
/// If the file becomes unreadable or invalid after a successful load, the
/// last good copy is served and a warning is logged.
#[derive(Debug)]
pub struct FileScheduleStore {
    path: PathBuf,
    last_good: Mutex<Option<Schedule>>,
}

impl FileScheduleStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: Mutex::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Schedule> {
        let content = std::fs::read_to_string(&self.path)?;
        toml::from_str(&content)
            .map_err(|e| PontoError::Schedule(format!("{}: {e}", self.path.display())))
    }
}

impl ScheduleStore for FileScheduleStore {
    fn get(&self) -> Result<Schedule> {
        let mut last_good = self
            .last_good
            .lock()
            .map_err(|_| PontoError::Schedule("schedule cache poisoned".to_owned()))?;

        match self.load() {
            Ok(schedule) => {
                debug!("loaded schedule from {}", self.path.display());
                *last_good = Some(schedule.clone());
                Ok(schedule)
            }
            Err(e) => match last_good.as_ref() {
                Some(previous) => {
                    warn!("cannot reload schedule, keeping previous copy: {e}");
                    Ok(previous.clone())
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::schedule::{DayOfWeek, DayPlan};

    #[test]
    fn static_schedule_returns_copy() {
        let schedule = Schedule::workweek(DayPlan::with_times(&["08:00"]));
        let store = StaticSchedule(schedule.clone());
        assert_eq!(store.get().unwrap(), schedule);
    }

    #[test]
    fn file_store_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");
        std::fs::write(&path, "[weekly.monday]\nentrada1 = \"08:00\"\n").unwrap();

        let store = FileScheduleStore::new(&path);
        assert_eq!(store.get().unwrap().weekly[&DayOfWeek::Monday].entrada1, "08:00");

        std::fs::write(&path, "[weekly.monday]\nentrada1 = \"09:30\"\n").unwrap();
        assert_eq!(store.get().unwrap().weekly[&DayOfWeek::Monday].entrada1, "09:30");
    }

    #[test]
    fn file_store_keeps_last_good_copy_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.toml");
        std::fs::write(&path, "[weekly.friday]\nentrada1 = \"07:00\"\n").unwrap();

        let store = FileScheduleStore::new(&path);
        store.get().unwrap();

        std::fs::write(&path, "this is not toml {{{").unwrap();
        let schedule = store.get().unwrap();
        assert_eq!(schedule.weekly[&DayOfWeek::Friday].entrada1, "07:00");
    }

    #[test]
    fn file_store_errors_without_previous_copy() {
        let store = FileScheduleStore::new("/nonexistent/ponto/schedule.toml");
        assert!(store.get().is_err());
    }
}
