//! Wall-clock source for the engine.

use chrono::{Local, NaiveDateTime};

/// Provides the current local date and time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The machine's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that starts at a fixed instant and advances with tokio's timer.
///
/// On a paused test runtime, sleeping advances this clock by exactly the
/// slept duration, which lets heartbeat logic run against a fake calendar.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    start: NaiveDateTime,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(start: NaiveDateTime) -> Self {
        Self {
            start,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = self.origin.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(delta) => self.start + delta,
            Err(_) => self.start,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(7, 59, 0)
            .unwrap();
        let clock = TokioClock::starting_at(start);
        assert_eq!(clock.now(), start);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn system_clock_is_close_to_local_now() {
        let before = Local::now().naive_local();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
