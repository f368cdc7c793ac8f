//! Ponto: automated time-clock punching.
//!
//! Keeps an employee's punches on a web time-clock portal in step with a
//! configured schedule:
//! Schedule → Reconcile → Heartbeat → Submit → Verify → Notify
//!
//! # Architecture
//!
//! - **Schedule**: weekly or monthly [`schedule::DayPlan`]s of up to four slots
//! - **Reconcile**: lines observed punches up with the slots and shifts the
//!   rest of the day by the observed delay
//! - **Engine**: a single supervised task that waits for the next punch,
//!   submits it once and polls the portal until it shows up
//! - **Portal**: an opaque session capability, backed by an external driver
//!   process spoken to over JSON-RPC
//! - **Notify**: best-effort outcome messages (log or Telegram)

pub mod clock;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod notify;
pub mod paths;
pub mod portal;
pub mod reconcile;
pub mod schedule;

#[doc(hidden)]
pub mod test_utils;

pub use config::PontoConfig;
pub use engine::{AutomationEngine, AutomationEvent, EngineSettings, StartRequest, StatusSnapshot};
pub use error::{PontoError, PortalError, Result};
pub use reconcile::{NextPunch, PunchPlan, Reconciler};
pub use schedule::{ClockTime, DayOfWeek, DayPlan, Schedule, SlotId};
