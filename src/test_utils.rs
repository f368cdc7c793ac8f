//! In-memory doubles for the portal and the notifier.
//!
//! Used by unit tests and by the integration tests under `tests/`.

use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::error::PortalError;
use crate::notify::Notifier;
use crate::portal::{ObservedPunch, PortalConnector, PortalSession, SnapshotArtifact};
use crate::schedule::ClockTime;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Call counters of a [`ScriptedPortal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalCalls {
    pub opens: u32,
    pub logins: u32,
    pub reads: u32,
    pub submits: u32,
    pub snapshots: u32,
    pub closes: u32,
    /// Most sessions ever open at the same time.
    pub max_concurrent_sessions: u32,
}

#[derive(Clone, Default)]
enum SubmitBehavior {
    /// Accept the click but never show the punch.
    #[default]
    Ignore,
    /// Show a punch at the clock's current minute.
    Record(Arc<dyn Clock>),
    Fail,
}

#[derive(Default)]
struct PortalState {
    punches: Vec<ObservedPunch>,
    calls: PortalCalls,
    on_submit: SubmitBehavior,
    failing_opens: u32,
    failing_logins: u32,
    login_delay: Option<Duration>,
    live_sessions: u32,
    snapshot_fails: bool,
}

/// A portal that lives in memory and counts every call.
#[derive(Clone, Default)]
pub struct ScriptedPortal {
    state: Arc<Mutex<PortalState>>,
}

impl std::fmt::Debug for ScriptedPortal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPortal")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedPortal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PortalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Punches the portal shows from the start.
    #[must_use]
    pub fn with_punches(self, punches: impl IntoIterator<Item = ObservedPunch>) -> Self {
        self.lock().punches.extend(punches);
        self
    }

    /// Submits register a punch at the clock's current minute.
    #[must_use]
    pub fn recording_submits(self, clock: Arc<dyn Clock>) -> Self {
        self.lock().on_submit = SubmitBehavior::Record(clock);
        self
    }

    /// Submits fail with a click error.
    #[must_use]
    pub fn failing_submits(self) -> Self {
        self.lock().on_submit = SubmitBehavior::Fail;
        self
    }

    /// The next `count` session openings fail to launch.
    #[must_use]
    pub fn failing_opens(self, count: u32) -> Self {
        self.lock().failing_opens = count;
        self
    }

    /// The next `count` logins are rejected.
    #[must_use]
    pub fn failing_logins(self, count: u32) -> Self {
        self.lock().failing_logins = count;
        self
    }

    /// Every login takes `delay` before answering.
    #[must_use]
    pub fn slow_logins(self, delay: Duration) -> Self {
        self.lock().login_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn failing_snapshots(self) -> Self {
        self.lock().snapshot_fails = true;
        self
    }

    /// Record a punch out of band, as if made by hand.
    pub fn add_punch(&self, punch: ObservedPunch) {
        self.lock().punches.push(punch);
    }

    #[must_use]
    pub fn calls(&self) -> PortalCalls {
        self.lock().calls
    }

    #[must_use]
    pub fn punches(&self) -> Vec<ObservedPunch> {
        let mut punches = self.lock().punches.clone();
        punches.sort();
        punches
    }
}

#[async_trait]
impl PortalConnector for ScriptedPortal {
    async fn open_session(&self) -> Result<Box<dyn PortalSession>, PortalError> {
        let mut state = self.lock();
        state.calls.opens += 1;
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(PortalError::Spawn(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scripted launch failure",
            )));
        }
        state.live_sessions += 1;
        state.calls.max_concurrent_sessions =
            state.calls.max_concurrent_sessions.max(state.live_sessions);
        Ok(Box::new(ScriptedSession {
            portal: self.clone(),
        }))
    }
}

struct ScriptedSession {
    portal: ScriptedPortal,
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        let mut state = self.portal.lock();
        state.live_sessions = state.live_sessions.saturating_sub(1);
    }
}

#[async_trait]
impl PortalSession for ScriptedSession {
    async fn login(&mut self, _credentials: &Credentials) -> Result<(), PortalError> {
        let delay = self.portal.lock().login_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.portal.lock();
        state.calls.logins += 1;
        if state.failing_logins > 0 {
            state.failing_logins -= 1;
            return Err(PortalError::Auth("scripted rejection".to_owned()));
        }
        Ok(())
    }

    async fn read_todays_punches(
        &mut self,
        _today: NaiveDate,
    ) -> Result<Vec<ObservedPunch>, PortalError> {
        let mut state = self.portal.lock();
        state.calls.reads += 1;
        let mut punches = state.punches.clone();
        punches.sort();
        Ok(punches)
    }

    async fn submit_punch(&mut self) -> Result<(), PortalError> {
        let mut state = self.portal.lock();
        state.calls.submits += 1;
        match state.on_submit.clone() {
            SubmitBehavior::Ignore => Ok(()),
            SubmitBehavior::Record(clock) => {
                let now = clock.now();
                let punch = ObservedPunch::new(now.date(), ClockTime::from_naive_time(now.time()));
                state.punches.push(punch);
                Ok(())
            }
            SubmitBehavior::Fail => Err(PortalError::Click("scripted click failure".to_owned())),
        }
    }

    async fn snapshot(&mut self) -> Result<SnapshotArtifact, PortalError> {
        let mut state = self.portal.lock();
        state.calls.snapshots += 1;
        if state.snapshot_fails {
            return Err(PortalError::Snapshot("scripted snapshot failure".to_owned()));
        }
        Ok(SnapshotArtifact {
            path: PathBuf::from(format!("snapshot-{}.png", state.calls.snapshots)),
        })
    }

    async fn close(&mut self) -> Result<(), PortalError> {
        self.portal.lock().calls.closes += 1;
        Ok(())
    }
}

/// Something a [`RecordingNotifier`] was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Artifact { path: PathBuf, caption: String },
}

/// Notifier that keeps every message in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Sent>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records messages but reports every delivery as failed.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text(text) => Some(text),
                Sent::Artifact { .. } => None,
            })
            .collect()
    }

    #[must_use]
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Artifact { path, .. } => Some(path),
                Sent::Text(_) => None,
            })
            .collect()
    }

    fn push(&self, sent: Sent) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sent);
        if self.failing {
            anyhow::bail!("scripted delivery failure");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn id(&self) -> &'static str {
        "recording"
    }

    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.push(Sent::Text(text.to_owned()))
    }

    async fn send_artifact(
        &self,
        artifact: &SnapshotArtifact,
        caption: &str,
    ) -> anyhow::Result<()> {
        self.push(Sent::Artifact {
            path: artifact.path.clone(),
            caption: caption.to_owned(),
        })
    }
}
