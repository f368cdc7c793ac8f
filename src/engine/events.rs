//! Status and log events published by the engine.

use crate::reconcile::NextPunch;
use crate::schedule::{ClockTime, SlotId};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

/// Event broadcast to subscribers (UI, CLI).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    /// Emitted on every state transition.
    Status(StatusSnapshot),
    /// Emitted on every significant step.
    Log(LogEntry),
}

/// Point-in-time view of the automation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub is_running: bool,
    /// Single human-readable status line.
    pub status_message: String,
    /// What the run is doing right now, if anything.
    pub current_task: Option<String>,
    pub next_punch: Option<NextPunch>,
    /// How the last run ended; `None` before the first run ends.
    pub outcome: Option<RunOutcome>,
}

impl StatusSnapshot {
    /// The idle state.
    pub fn idle(message: impl Into<String>) -> Self {
        Self {
            is_running: false,
            status_message: message.into(),
            current_task: None,
            next_punch: None,
            outcome: None,
        }
    }

    /// Idle after a run ended with `outcome`.
    pub fn ended(outcome: RunOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome: Some(outcome),
            ..Self::idle(message)
        }
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Stopped on request.
    Stopped,
    /// No punch left within the lookahead horizon.
    NothingPending,
    /// Halted by a critical error.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub at: NaiveDateTime,
}

/// How a punch attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PunchOutcome {
    /// Submitted and seen on the portal at `observed`.
    Confirmed { observed: ClockTime },
    /// Already on the portal; nothing was submitted.
    AlreadyRegistered,
    /// Submitted but never seen on the portal.
    Unconfirmed,
}

/// One entry of the in-memory run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PunchRecord {
    pub slot: SlotId,
    pub target: NaiveDateTime,
    pub outcome: PunchOutcome,
    pub at: NaiveDateTime,
}
