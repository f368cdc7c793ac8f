//! Punch automation engine.
//!
//! One [`AutomationEngine`] owns at most one run at a time. A run is a
//! single tokio task that loops:
//!
//! 1. read the schedule and reconcile it with the last observed punches,
//! 2. wait on heartbeats until the next punch is due,
//! 3. submit and verify the punch,
//! 4. re-sync from the portal and start over.
//!
//! Every remote step goes through [`supervisor::supervise`], and every
//! wait is raced against the run's cancellation token.

pub mod events;
pub mod supervisor;

pub use events::{
    AutomationEvent, LogEntry, LogLevel, PunchOutcome, PunchRecord, RunOutcome, StatusSnapshot,
};
pub use supervisor::{RetryPolicy, RunGate, Supervised, supervise};

use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::error::{PontoError, PortalError, Result};
use crate::notify::{Notifier, deliver_artifact, deliver_text, messages};
use crate::portal::{ObservedPunch, PortalConnector, PortalSession};
use crate::reconcile::{NextPunch, PunchPlan, Reconciler, confirm_registration, is_registered};
use crate::schedule::{ScheduleStore, SlotId};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

/// Punch records kept in memory.
const HISTORY_LIMIT: usize = 100;

const EVENT_CAPACITY: usize = 256;

/// Heartbeat wait policy.
///
/// Far from the target the engine wakes every `far`; inside `far` every
/// `near`; inside `near` it sleeps the exact remaining time but never less
/// than `floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub far: Duration,
    pub near: Duration,
    pub floor: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            far: Duration::from_secs(300),
            near: Duration::from_secs(60),
            floor: Duration::from_secs(5),
        }
    }
}

impl HeartbeatPolicy {
    /// Wait before the next heartbeat given the time left to the target.
    #[must_use]
    pub fn interval(&self, time_to_target: Duration) -> Duration {
        if time_to_target > self.far {
            self.far
        } else if time_to_target > self.near {
            self.near
        } else {
            time_to_target.max(self.floor)
        }
    }
}

/// What a heartbeat should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Inside `[target, target + tolerance]`.
    Execute,
    /// Before the target.
    Early { remaining: Duration },
    /// Past the tolerance window.
    Missed { late_by: Duration },
}

/// Compare a heartbeat's wake-up time with the target.
#[must_use]
pub fn classify_fire(
    now: NaiveDateTime,
    target: NaiveDateTime,
    tolerance: Duration,
) -> FireDecision {
    if now < target {
        let remaining = (target - now).to_std().unwrap_or_default();
        return FireDecision::Early { remaining };
    }
    let late_by = (now - target).to_std().unwrap_or_default();
    if late_by <= tolerance {
        FireDecision::Execute
    } else {
        FireDecision::Missed { late_by }
    }
}

/// Runtime settings of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub retry: RetryPolicy,
    pub heartbeat: HeartbeatPolicy,
    /// Lateness still accepted when a heartbeat fires.
    pub tolerance: Duration,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
    /// Allowed skew, in minutes, between the target and a new punch.
    pub match_tolerance_mins: i32,
    pub lookahead_days: u32,
    /// How long `stop` waits for the run task before aborting it.
    pub stop_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            heartbeat: HeartbeatPolicy::default(),
            tolerance: Duration::from_secs(10),
            verify_attempts: 10,
            verify_interval: Duration::from_secs(5),
            match_tolerance_mins: 2,
            lookahead_days: 6,
            stop_grace: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    fn reconciler(&self) -> Reconciler {
        Reconciler {
            lookahead_days: self.lookahead_days,
            tolerance: chrono::Duration::from_std(self.tolerance)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
        }
    }
}

/// Inputs of a run.
pub struct StartRequest {
    pub schedule: Arc<dyn ScheduleStore>,
    pub credentials: Credentials,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// `false` when a run was already active.
    pub accepted: bool,
}

/// State visible to callers and written by the run task.
struct Shared {
    /// Run allowed to publish its end. Locked before `status`.
    current_run: Mutex<Option<Uuid>>,
    status: Mutex<StatusSnapshot>,
    history: Mutex<VecDeque<PunchRecord>>,
    events: broadcast::Sender<AutomationEvent>,
    running: watch::Sender<bool>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn new(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (running, _) = watch::channel(false);
        Self {
            current_run: Mutex::new(None),
            status: Mutex::new(StatusSnapshot::idle("Parado")),
            history: Mutex::new(VecDeque::new()),
            events,
            running,
            clock,
        }
    }

    fn status(&self) -> StatusSnapshot {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, update: impl FnOnce(&mut StatusSnapshot)) {
        let snapshot = {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            update(&mut status);
            status.clone()
        };
        self.running.send_replace(snapshot.is_running);
        let _ = self.events.send(AutomationEvent::Status(snapshot));
    }

    /// Make `id` the current run and publish `snapshot`.
    fn begin_run(&self, id: Uuid, snapshot: StatusSnapshot) {
        let mut current = self
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Some(id);
        self.update_status(|status| *status = snapshot);
    }

    /// Publish the end of run `id`. Ignored when another run took over.
    fn end_run(&self, id: Uuid, outcome: RunOutcome, message: String) -> bool {
        let mut current = self
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != Some(id) {
            debug!(run_id = %id, "stale run end ignored");
            return false;
        }
        *current = None;
        self.update_status(|status| *status = StatusSnapshot::ended(outcome, message));
        true
    }

    fn set_task(&self, task: impl Into<String>) {
        let task = task.into();
        self.update_status(|status| status.current_task = Some(task));
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Success => info!(outcome = "success", "{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        let _ = self.events.send(AutomationEvent::Log(LogEntry {
            level,
            message,
            at: self.clock.now(),
        }));
    }

    fn record(&self, slot: SlotId, target: NaiveDateTime, outcome: PunchOutcome) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(PunchRecord {
            slot,
            target,
            outcome,
            at: self.clock.now(),
        });
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }
}

struct ActiveRun {
    id: Uuid,
    gate: Arc<RunGate>,
    handle: JoinHandle<()>,
}

/// Start/stop façade over the run task.
pub struct AutomationEngine {
    connector: Arc<dyn PortalConnector>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl AutomationEngine {
    pub fn new(
        connector: Arc<dyn PortalConnector>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared::new(Arc::clone(&clock))),
            clock,
            settings,
            active: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start a run. A no-op returning `accepted: false` if one is active.
    pub async fn start(&self, request: StartRequest) -> StartOutcome {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|run| !run.handle.is_finished()) {
            self.shared
                .log(LogLevel::Warning, "Automação já está em execução");
            return StartOutcome { accepted: false };
        }

        let id = Uuid::new_v4();
        let gate = Arc::new(RunGate::new());
        self.shared.begin_run(
            id,
            StatusSnapshot {
                is_running: true,
                status_message: "Automação em execução".to_owned(),
                current_task: Some("Iniciando".to_owned()),
                next_punch: None,
                outcome: None,
            },
        );

        let task = RunTask {
            id,
            connector: Arc::clone(&self.connector),
            clock: Arc::clone(&self.clock),
            settings: self.settings,
            shared: Arc::clone(&self.shared),
            gate: Arc::clone(&gate),
            schedule: request.schedule,
            credentials: request.credentials,
            notifier: request.notifier,
        };
        let handle = tokio::spawn(task.run().instrument(tracing::info_span!("run", run_id = %id)));
        info!(run_id = %id, "automation run started");

        *active = Some(ActiveRun { id, gate, handle });
        StartOutcome { accepted: true }
    }

    /// Stop the active run, if any.
    ///
    /// Closes the gate at once, then waits up to `stop_grace` for the run
    /// task to close its session before aborting it. The run stays
    /// registered until then, so a concurrent `start` waits for it.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(run) = active.as_mut() else {
            debug!("stop requested without an active run");
            return;
        };

        run.gate.halt();
        if tokio::time::timeout(self.settings.stop_grace, &mut run.handle)
            .await
            .is_err()
        {
            warn!(run_id = %run.id, "run task did not finish in time, aborting");
            run.handle.abort();
            self.shared.log(LogLevel::Warning, "Automação interrompida à força");
            self.shared.end_run(
                run.id,
                RunOutcome::Stopped,
                "Automação parada".to_owned(),
            );
        }
        *active = None;
    }

    /// Resolves once no run is active.
    pub async fn wait(&self) {
        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.shared.status()
    }

    /// Status and log events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.shared.events.subscribe()
    }

    /// Recent punch attempts, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<PunchRecord> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Why a run ended.
#[derive(Debug)]
enum RunEnd {
    Stopped,
    NothingPending,
    Critical(PontoError),
}

enum Heartbeat {
    Due,
    Missed { late_by: Duration },
    Cancelled,
}

struct RunTask {
    id: Uuid,
    connector: Arc<dyn PortalConnector>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    gate: Arc<RunGate>,
    schedule: Arc<dyn ScheduleStore>,
    credentials: Credentials,
    notifier: Arc<dyn Notifier>,
}

impl RunTask {
    async fn run(self) {
        let end = self.drive().await;
        self.finish(end).await;
    }

    async fn drive(&self) -> RunEnd {
        self.shared.log(LogLevel::Info, "Automação iniciada");
        deliver_text(self.notifier.as_ref(), &messages::run_started()).await;

        let mut observed = match self.supervised("sync", || self.sync(true)).await {
            Ok(observed) => observed,
            Err(end) => return end,
        };

        let reconciler = self.settings.reconciler();
        let mut memory = DayMemory::default();

        loop {
            if !self.gate.is_running() {
                return RunEnd::Stopped;
            }

            let schedule = match self.schedule.get() {
                Ok(schedule) => schedule,
                Err(e) => {
                    self.gate.halt();
                    return RunEnd::Critical(e);
                }
            };
            let now = self.clock.now();
            memory.prune(now.date());
            let plan =
                reconciler.plan_waiving(&schedule, &observed, now, &memory.waived_on(now.date()));
            self.report_plan(&plan, &mut memory);

            let Some(next) = plan.next else {
                return RunEnd::NothingPending;
            };

            self.shared.update_status(|status| {
                status.next_punch = Some(next.clone());
                status.current_task = Some(format!(
                    "Aguardando {} às {} ({})",
                    next.slot.label(),
                    next.time,
                    next.day.display_name_pt()
                ));
            });
            self.shared.log(
                LogLevel::Info,
                format!(
                    "Próximo ponto: {} às {} ({})",
                    next.slot.label(),
                    next.time,
                    next.date().format("%d/%m")
                ),
            );

            match self.wait_for(&next).await {
                Heartbeat::Cancelled => return RunEnd::Stopped,
                Heartbeat::Missed { late_by } => {
                    self.shared.log(
                        LogLevel::Warning,
                        format!(
                            "Janela de {} às {} perdida por {}s; ressincronizando",
                            next.slot.label(),
                            next.time,
                            late_by.as_secs()
                        ),
                    );
                }
                Heartbeat::Due => {
                    self.shared
                        .set_task(format!("Registrando {} ({})", next.slot.label(), next.time));
                    if let Err(end) = self.supervised("punch", || self.punch(&next)).await {
                        return end;
                    }
                }
            }

            observed = match self.supervised("sync", || self.sync(false)).await {
                Ok(observed) => observed,
                Err(end) => return end,
            };
        }
    }

    async fn supervised<T, F, Fut>(
        &self,
        step: &str,
        attempt: F,
    ) -> std::result::Result<T, RunEnd>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match supervise(&self.settings.retry, &self.gate, step, attempt).await {
            Supervised::Completed(value) => Ok(value),
            Supervised::StopRequested => Err(RunEnd::Stopped),
            Supervised::Critical(e) => Err(RunEnd::Critical(e)),
        }
    }

    fn report_plan(&self, plan: &PunchPlan, memory: &mut DayMemory) {
        let Some(today) = &plan.today else {
            return;
        };
        if let Some(delta) = today.delta_minutes.filter(|delta| *delta != 0) {
            debug!(delta_minutes = delta, "later slots shifted by anchor delta");
        }
        for slot in &today.clamped {
            if memory.clamp_warned.insert((today.date, *slot)) {
                self.shared.log(
                    LogLevel::Warning,
                    format!("Horário ajustado de {} limitado ao mesmo dia", slot.label()),
                );
            }
        }
        for missed in &plan.missed {
            if memory.waived.insert((today.date, missed.slot)) {
                self.shared.log(
                    LogLevel::Warning,
                    format!(
                        "Horário de {} ({}) já passou; ponto não será registrado",
                        missed.slot.label(),
                        missed.time
                    ),
                );
            }
        }
    }

    async fn wait_for(&self, next: &NextPunch) -> Heartbeat {
        loop {
            match classify_fire(self.clock.now(), next.date_time, self.settings.tolerance) {
                FireDecision::Execute => return Heartbeat::Due,
                FireDecision::Missed { late_by } => return Heartbeat::Missed { late_by },
                FireDecision::Early { remaining } => {
                    let wait = self.settings.heartbeat.interval(remaining);
                    debug!(
                        slot = %next.slot,
                        remaining_secs = remaining.as_secs(),
                        wait_secs = wait.as_secs(),
                        "heartbeat scheduled"
                    );
                    if !self.gate.sleep(wait).await {
                        return Heartbeat::Cancelled;
                    }
                }
            }
        }
    }

    /// Open a session, log in and read the punches.
    ///
    /// At run start a session that cannot be opened is fatal.
    async fn sync(&self, at_start: bool) -> Result<Vec<ObservedPunch>> {
        self.shared.set_task("Sincronizando com o portal");
        let mut session = match self.connector.open_session().await {
            Ok(session) => session,
            Err(e) if at_start => {
                return Err(PontoError::Critical(format!(
                    "não foi possível abrir sessão no portal: {e}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let today = self.clock.now().date();
        let result: std::result::Result<Vec<ObservedPunch>, PortalError> = async {
            session.login(&self.credentials).await?;
            session.read_todays_punches(today).await
        }
        .await;
        close_session(session.as_mut()).await;

        let observed = result?;
        let listed: Vec<String> = observed.iter().map(ToString::to_string).collect();
        self.shared.log(
            LogLevel::Debug,
            format!("Pontos no portal: [{}]", listed.join(", ")),
        );
        Ok(observed)
    }

    async fn punch(&self, next: &NextPunch) -> Result<PunchOutcome> {
        let mut session = self.connector.open_session().await?;
        let result: Result<PunchOutcome> = async {
            session.login(&self.credentials).await?;
            self.perform_punch(session.as_mut(), next).await
        }
        .await;
        close_session(session.as_mut()).await;
        result
    }

    /// Pre-check, submit once, then poll until the punch shows up.
    async fn perform_punch(
        &self,
        session: &mut dyn PortalSession,
        next: &NextPunch,
    ) -> Result<PunchOutcome> {
        if !self.gate.is_running() {
            return Err(PontoError::StopRequested);
        }

        let today = self.clock.now().date();
        let date = next.date();
        let label = next.slot.label();

        let before = session.read_todays_punches(today).await?;
        if is_registered(&before, date, next.time) {
            self.shared.log(
                LogLevel::Info,
                format!("{label} às {} já consta no portal", next.time),
            );
            deliver_text(
                self.notifier.as_ref(),
                &messages::already_registered(next.slot, next.time),
            )
            .await;
            self.shared
                .record(next.slot, next.date_time, PunchOutcome::AlreadyRegistered);
            return Ok(PunchOutcome::AlreadyRegistered);
        }

        info!(slot = %next.slot, target = %next.time, "submitting punch");
        session.submit_punch().await?;

        let attempts = self.settings.verify_attempts;
        for attempt in 1..=attempts {
            if !self.gate.sleep(self.settings.verify_interval).await {
                return Err(PontoError::StopRequested);
            }
            let after = match session.read_todays_punches(today).await {
                Ok(after) => after,
                Err(e) => {
                    warn!(attempt, "verification read failed: {e}");
                    continue;
                }
            };
            if let Some(observed) = confirm_registration(
                &before,
                &after,
                date,
                next.time,
                self.settings.match_tolerance_mins,
            ) {
                self.shared.log(
                    LogLevel::Success,
                    format!("{label} registrado às {observed}"),
                );
                deliver_text(
                    self.notifier.as_ref(),
                    &messages::punch_confirmed(next.slot, observed),
                )
                .await;
                let outcome = PunchOutcome::Confirmed { observed };
                self.shared.record(next.slot, next.date_time, outcome);
                return Ok(outcome);
            }
            debug!(attempt, attempts, "punch not visible yet");
        }

        self.shared.log(
            LogLevel::Error,
            format!(
                "{label} ({}) não confirmado após {attempts} verificações",
                next.time
            ),
        );
        let snapshot = match session.snapshot().await {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("could not capture portal snapshot: {e}");
                None
            }
        };
        deliver_text(
            self.notifier.as_ref(),
            &messages::punch_unconfirmed(next.slot, next.time, attempts),
        )
        .await;
        if let Some(artifact) = &snapshot {
            deliver_artifact(
                self.notifier.as_ref(),
                artifact,
                &messages::snapshot_caption(next.slot, next.time),
            )
            .await;
        }
        self.shared
            .record(next.slot, next.date_time, PunchOutcome::Unconfirmed);

        Err(PontoError::Verification {
            target: next.time.to_string(),
            attempts,
        })
    }

    async fn finish(&self, end: RunEnd) {
        self.gate.halt();
        let (outcome, level, message) = match end {
            RunEnd::Stopped => {
                deliver_text(self.notifier.as_ref(), &messages::run_stopped()).await;
                (RunOutcome::Stopped, LogLevel::Info, "Automação parada".to_owned())
            }
            RunEnd::NothingPending => (
                RunOutcome::NothingPending,
                LogLevel::Info,
                "Nenhum ponto pendente".to_owned(),
            ),
            RunEnd::Critical(e) => {
                deliver_text(self.notifier.as_ref(), &messages::critical_stop(&e.to_string()))
                    .await;
                (RunOutcome::Failed, LogLevel::Error, format!("Falha crítica: {e}"))
            }
        };
        self.shared.log(level, message.clone());
        self.shared.end_run(self.id, outcome, message);
    }
}

/// Per-day facts a run remembers between cycles.
#[derive(Debug, Default)]
struct DayMemory {
    /// Slots reported missed; left out of later reconciliations.
    waived: BTreeSet<(NaiveDate, SlotId)>,
    clamp_warned: BTreeSet<(NaiveDate, SlotId)>,
}

impl DayMemory {
    /// Forget days before `today`.
    fn prune(&mut self, today: NaiveDate) {
        self.waived.retain(|(date, _)| *date >= today);
        self.clamp_warned.retain(|(date, _)| *date >= today);
    }

    fn waived_on(&self, date: NaiveDate) -> Vec<SlotId> {
        self.waived
            .iter()
            .filter(|(day, _)| *day == date)
            .map(|(_, slot)| *slot)
            .collect()
    }
}

async fn close_session(session: &mut dyn PortalSession) {
    if let Err(e) = session.close().await {
        warn!("failed to close portal session: {e}");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::clock::TokioClock;
    use crate::schedule::{ClockTime, DayOfWeek, DayPlan, Schedule, StaticSchedule};
    use crate::test_utils::{RecordingNotifier, ScriptedPortal};

    // 2025-03-03 is a Monday.
    fn monday_at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn t(s: &str) -> ClockTime {
        s.parse().unwrap()
    }

    fn monday_only(times: &[&str]) -> Arc<dyn ScheduleStore> {
        Arc::new(StaticSchedule(Schedule::weekly([(
            DayOfWeek::Monday,
            DayPlan::with_times(times),
        )])))
    }

    fn request(schedule: Arc<dyn ScheduleStore>, notifier: &RecordingNotifier) -> StartRequest {
        StartRequest {
            schedule,
            credentials: Credentials::new("12345", "secret"),
            notifier: Arc::new(notifier.clone()),
        }
    }

    fn run_task(
        portal: &ScriptedPortal,
        notifier: &RecordingNotifier,
        clock: Arc<dyn Clock>,
    ) -> RunTask {
        RunTask {
            id: Uuid::new_v4(),
            connector: Arc::new(portal.clone()),
            shared: Arc::new(Shared::new(Arc::clone(&clock))),
            clock,
            settings: EngineSettings::default(),
            gate: Arc::new(RunGate::new()),
            schedule: monday_only(&["09:00", "18:00"]),
            credentials: Credentials::new("12345", "secret"),
            notifier: Arc::new(notifier.clone()),
        }
    }

    fn next_at(slot: SlotId, at: NaiveDateTime) -> NextPunch {
        NextPunch {
            day: DayOfWeek::of(at.date()),
            slot,
            time: ClockTime::from_naive_time(at.time()),
            date_time: at,
        }
    }

    #[test]
    fn heartbeat_interval_policy() {
        let policy = HeartbeatPolicy::default();
        let secs = Duration::from_secs;
        assert_eq!(policy.interval(secs(3600)), secs(300));
        assert_eq!(policy.interval(secs(301)), secs(300));
        assert_eq!(policy.interval(secs(300)), secs(60));
        assert_eq!(policy.interval(secs(61)), secs(60));
        assert_eq!(policy.interval(secs(60)), secs(60));
        assert_eq!(policy.interval(secs(30)), secs(30));
        assert_eq!(policy.interval(secs(2)), secs(5));
        assert_eq!(policy.interval(Duration::ZERO), secs(5));
    }

    #[test]
    fn tolerance_window_boundaries() {
        let target = monday_at(9, 0, 0);
        let tol = Duration::from_secs(10);
        assert_eq!(classify_fire(target, target, tol), FireDecision::Execute);
        assert_eq!(
            classify_fire(monday_at(9, 0, 9), target, tol),
            FireDecision::Execute
        );
        assert_eq!(
            classify_fire(monday_at(9, 0, 11), target, tol),
            FireDecision::Missed {
                late_by: Duration::from_secs(11)
            }
        );
        assert_eq!(
            classify_fire(monday_at(8, 59, 30), target, tol),
            FireDecision::Early {
                remaining: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn perform_punch_is_idempotent() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(9, 0, 2)));
        let portal = ScriptedPortal::new()
            .with_punches([ObservedPunch::new(monday_at(9, 0, 0).date(), t("09:00"))]);
        let notifier = RecordingNotifier::new();
        let task = run_task(&portal, &notifier, clock);

        let mut session = portal.open_session().await.unwrap();
        let next = next_at(SlotId::Entrada1, monday_at(9, 0, 0));
        let outcome = task.perform_punch(session.as_mut(), &next).await.unwrap();

        assert_eq!(outcome, PunchOutcome::AlreadyRegistered);
        assert_eq!(portal.calls().submits, 0);
        assert_eq!(notifier.texts().len(), 1);
        assert!(notifier.texts()[0].contains("já registrado"));
    }

    #[tokio::test(start_paused = true)]
    async fn perform_punch_confirms_after_one_poll() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(9, 0, 2)));
        let portal = ScriptedPortal::new().recording_submits(Arc::clone(&clock));
        let notifier = RecordingNotifier::new();
        let task = run_task(&portal, &notifier, clock);

        let mut session = portal.open_session().await.unwrap();
        let next = next_at(SlotId::Entrada1, monday_at(9, 0, 0));
        let outcome = task.perform_punch(session.as_mut(), &next).await.unwrap();

        assert_eq!(outcome, PunchOutcome::Confirmed { observed: t("09:00") });
        let calls = portal.calls();
        assert_eq!(calls.submits, 1);
        // Pre-check plus the first verification read.
        assert_eq!(calls.reads, 2);
        assert_eq!(task.shared.history.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_punch_snapshots_notifies_and_raises_retryable_error() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(9, 0, 0)));
        let portal = ScriptedPortal::new();
        let notifier = RecordingNotifier::new();
        let task = run_task(&portal, &notifier, clock);

        let mut session = portal.open_session().await.unwrap();
        let next = next_at(SlotId::Entrada1, monday_at(9, 0, 0));
        let started = tokio::time::Instant::now();
        let err = task
            .perform_punch(session.as_mut(), &next)
            .await
            .unwrap_err();

        assert!(matches!(err, PontoError::Verification { attempts: 10, .. }));
        assert!(err.is_retryable());
        let calls = portal.calls();
        assert_eq!(calls.submits, 1);
        // Pre-check plus ten verification reads.
        assert_eq!(calls.reads, 11);
        assert_eq!(calls.snapshots, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(50));
        assert_eq!(notifier.texts().len(), 1);
        assert_eq!(notifier.artifacts().len(), 1);
        assert!(task.gate.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_snapshot_still_notifies() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(9, 0, 0)));
        let portal = ScriptedPortal::new().failing_snapshots();
        let notifier = RecordingNotifier::failing();
        let task = run_task(&portal, &notifier, clock);

        let mut session = portal.open_session().await.unwrap();
        let next = next_at(SlotId::Entrada1, monday_at(9, 0, 0));
        let err = task.perform_punch(session.as_mut(), &next).await.unwrap_err();

        assert!(matches!(err, PontoError::Verification { .. }));
        assert_eq!(notifier.texts().len(), 1);
        assert!(notifier.artifacts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_day_run_punches_both_slots_then_ends() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(8, 59, 0)));
        let portal = ScriptedPortal::new().recording_submits(Arc::clone(&clock));
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(
            Arc::new(portal.clone()),
            Arc::clone(&clock),
            EngineSettings::default(),
        );

        let outcome = engine
            .start(request(monday_only(&["09:00", "18:00"]), &notifier))
            .await;
        assert!(outcome.accepted);
        engine.wait().await;

        let history = engine.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].slot, SlotId::Entrada1);
        assert_eq!(history[0].outcome, PunchOutcome::Confirmed { observed: t("09:00") });
        assert_eq!(history[1].slot, SlotId::Saida1);
        assert_eq!(history[1].outcome, PunchOutcome::Confirmed { observed: t("18:00") });
        assert_eq!(portal.calls().submits, 2);
        assert_eq!(portal.calls().opens, portal.calls().closes);

        let status = engine.status();
        assert!(!status.is_running);
        assert_eq!(status.status_message, "Nenhum ponto pendente");
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(7, 0, 0)));
        let portal = ScriptedPortal::new();
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(Arc::new(portal), clock, EngineSettings::default());

        assert!(engine.start(request(monday_only(&["09:00"]), &notifier)).await.accepted);
        assert!(!engine.start(request(monday_only(&["09:00"]), &notifier)).await.accepted);
        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn session_failure_at_start_aborts_without_retry() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(7, 0, 0)));
        let portal = ScriptedPortal::new().failing_opens(1);
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(
            Arc::new(portal.clone()),
            clock,
            EngineSettings::default(),
        );

        engine.start(request(monday_only(&["09:00"]), &notifier)).await;
        engine.wait().await;

        assert_eq!(portal.calls().opens, 1);
        let status = engine.status();
        assert!(!status.is_running);
        assert!(status.status_message.starts_with("Falha crítica"));
        assert_eq!(status.outcome, Some(RunOutcome::Failed));
    }

    #[test]
    fn stale_run_end_does_not_overwrite_a_newer_run() {
        let shared = Shared::new(Arc::new(crate::clock::SystemClock));
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        let running = StatusSnapshot {
            is_running: true,
            status_message: "Automação em execução".to_owned(),
            ..StatusSnapshot::default()
        };

        shared.begin_run(old, running.clone());
        shared.begin_run(new, running);
        assert!(!shared.end_run(old, RunOutcome::Stopped, "Automação parada".to_owned()));
        assert!(shared.status().is_running);
        assert!(*shared.running.borrow());

        assert!(shared.end_run(new, RunOutcome::Stopped, "Automação parada".to_owned()));
        assert_eq!(shared.status().outcome, Some(RunOutcome::Stopped));
        assert!(!*shared.running.borrow());
    }

    #[test]
    fn day_memory_forgets_past_days() {
        let monday = monday_at(0, 0, 0).date();
        let tuesday = monday.succ_opt().unwrap();
        let mut memory = DayMemory::default();
        memory.waived.insert((monday, SlotId::Entrada1));
        memory.waived.insert((tuesday, SlotId::Saida1));
        memory.clamp_warned.insert((monday, SlotId::Saida2));

        memory.prune(tuesday);
        assert_eq!(memory.waived_on(monday), Vec::<SlotId>::new());
        assert_eq!(memory.waived_on(tuesday), vec![SlotId::Saida1]);
        assert!(memory.clamp_warned.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_stop_the_run() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(8, 59, 50)));
        let portal = ScriptedPortal::new();
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(
            Arc::new(portal.clone()),
            clock,
            EngineSettings::default(),
        );

        engine.start(request(monday_only(&["09:00"]), &notifier)).await;
        engine.wait().await;

        // One attempt plus three retries, never a fifth.
        assert_eq!(portal.calls().submits, 4);
        assert_eq!(engine.history().len(), 4);
        assert!(
            engine
                .history()
                .iter()
                .all(|record| record.outcome == PunchOutcome::Unconfirmed)
        );
        assert!(notifier.texts().iter().any(|text| text.contains("falhas repetidas")));
        assert!(!engine.status().is_running);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_verification_discards_the_attempt() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(8, 59, 55)));
        let portal = ScriptedPortal::new();
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(
            Arc::new(portal.clone()),
            clock,
            EngineSettings::default(),
        );

        engine.start(request(monday_only(&["09:00", "18:00"]), &notifier)).await;
        while portal.calls().submits == 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        engine.stop().await;

        let reads_at_stop = portal.calls().reads;
        tokio::time::sleep(Duration::from_secs(600)).await;

        let calls = portal.calls();
        assert_eq!(calls.submits, 1);
        assert_eq!(calls.reads, reads_at_stop);
        assert_eq!(calls.opens, calls.closes);
        assert!(engine.history().is_empty());
        assert!(!engine.is_running());
        assert_eq!(engine.status().status_message, "Automação parada");
        assert!(notifier.texts().iter().any(|text| text.contains("parada")));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_window_resyncs_without_punching() {
        // A 30s floor makes the heartbeat overshoot the 10s tolerance.
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(8, 59, 50)));
        let portal = ScriptedPortal::new().recording_submits(Arc::clone(&clock));
        let notifier = RecordingNotifier::new();
        let settings = EngineSettings {
            heartbeat: HeartbeatPolicy {
                floor: Duration::from_secs(30),
                ..HeartbeatPolicy::default()
            },
            ..EngineSettings::default()
        };
        let engine = AutomationEngine::new(Arc::new(portal.clone()), clock, settings);
        let mut events = engine.subscribe();

        engine.start(request(monday_only(&["09:00"]), &notifier)).await;
        engine.wait().await;

        let calls = portal.calls();
        assert_eq!(calls.submits, 0);
        // Initial sync plus the re-sync after the missed window.
        assert_eq!(calls.opens, 2);
        assert!(engine.history().is_empty());
        assert_eq!(engine.status().outcome, Some(RunOutcome::NothingPending));

        let mut missed_warning = false;
        loop {
            match events.try_recv() {
                Ok(AutomationEvent::Log(entry)) => {
                    if entry.level == LogLevel::Warning && entry.message.contains("perdida") {
                        missed_warning = true;
                    }
                }
                Ok(AutomationEvent::Status(_))
                | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        assert!(missed_warning);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_band_punch_shifts_the_next_target() {
        // The user clocked in by hand at 08:10; saida1 moves to 12:10.
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(monday_at(9, 0, 0)));
        let date = monday_at(0, 0, 0).date();
        let portal = ScriptedPortal::new()
            .with_punches([ObservedPunch::new(date, t("08:10"))])
            .recording_submits(Arc::clone(&clock));
        let notifier = RecordingNotifier::new();
        let engine = AutomationEngine::new(
            Arc::new(portal.clone()),
            clock,
            EngineSettings::default(),
        );

        engine.start(request(monday_only(&["08:00", "12:00"]), &notifier)).await;
        engine.wait().await;

        let history = engine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].target, monday_at(12, 10, 0));
        assert_eq!(
            portal.punches().last().map(|p| p.time),
            Some(t("12:10"))
        );
    }
}
