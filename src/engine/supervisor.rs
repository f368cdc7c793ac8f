//! Bounded retry and cooperative cancellation around remote steps.

use crate::error::{PontoError, Result};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Linear backoff: the n-th retry waits `retry_interval * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (3 ⇒ 4 attempts in total).
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_interval: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.retry_interval.saturating_mul(retry)
    }
}

/// Run-scoped state shared by the engine and the supervisor.
///
/// Closing the gate is one-way: once [`halt`](Self::halt) is called every
/// pending wait wakes up and no further step starts.
#[derive(Debug)]
pub struct RunGate {
    running: AtomicBool,
    retry_count: AtomicU32,
    cancel: CancellationToken,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RunGate {
    /// An open gate.
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            retry_count: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Close the gate and wake every pending wait.
    pub fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Token cancelled when the gate closes.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Consecutive failures of the current step.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    fn record_failure(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn reset_retries(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
    }

    /// Sleep for `duration` unless the gate closes first.
    ///
    /// Returns `false` when woken by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => self.is_running(),
        }
    }
}

/// Result of a supervised step.
#[derive(Debug)]
pub enum Supervised<T> {
    /// The step succeeded while the run was still active.
    Completed(T),
    /// The run was stopped; any result was discarded.
    StopRequested,
    /// Retries were exhausted or the failure was not retryable. The gate has
    /// been closed.
    Critical(PontoError),
}

/// Run `step` with bounded linear-backoff retries.
///
/// The gate is checked before every attempt and after every outcome, so a
/// stop issued while a remote call is in flight discards its result. A
/// non-retryable error escalates immediately.
pub async fn supervise<T, F, Fut>(
    policy: &RetryPolicy,
    gate: &RunGate,
    step: &str,
    mut attempt: F,
) -> Supervised<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    loop {
        if !gate.is_running() {
            debug!(step, "stop requested, skipping step");
            return Supervised::StopRequested;
        }

        let outcome = attempt().await;

        if !gate.is_running() {
            debug!(step, "stop requested while step was in flight, discarding result");
            return Supervised::StopRequested;
        }

        let err = match outcome {
            Ok(value) => {
                gate.reset_retries();
                return Supervised::Completed(value);
            }
            Err(PontoError::StopRequested) => return Supervised::StopRequested,
            Err(err) => err,
        };

        let retry = gate.record_failure();
        if !err.is_retryable() || retry > policy.max_retries {
            error!(step, retry, "step failed critically: {err}");
            gate.halt();
            let err = match err {
                PontoError::Critical(_) => err,
                other => PontoError::Critical(format!("{step}: {other}")),
            };
            return Supervised::Critical(err);
        }

        let delay = policy.delay_for_retry(retry);
        warn!(
            step,
            retry,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "step failed, retrying: {err}"
        );
        if !gate.sleep(delay).await {
            return Supervised::StopRequested;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::PortalError;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn transient() -> PontoError {
        PortalError::Navigation("page did not load".to_owned()).into()
    }

    #[test]
    fn linear_backoff_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter() {
        let gate = RunGate::new();
        let calls = AtomicUsize::new(0);
        let result = supervise(&RetryPolicy::default(), &gate, "read", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;
        assert!(matches!(result, Supervised::Completed(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(gate.retry_count(), 0);
        assert!(gate.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn four_failures_escalate_once_without_fifth_attempt() {
        let gate = RunGate::new();
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result: Supervised<()> = supervise(&RetryPolicy::default(), &gate, "punch", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(matches!(result, Supervised::Critical(PontoError::Critical(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(!gate.is_running());
        // 2s + 4s + 6s of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_escalates_immediately() {
        let gate = RunGate::new();
        let calls = AtomicUsize::new(0);
        let result: Supervised<()> = supervise(&RetryPolicy::default(), &gate, "schedule", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PontoError::Schedule("unreadable".to_owned()))
        })
        .await;
        assert!(matches!(result, Supervised::Critical(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_gate_short_circuits() {
        let gate = RunGate::new();
        gate.halt();
        let calls = AtomicUsize::new(0);
        let result: Supervised<()> = supervise(&RetryPolicy::default(), &gate, "login", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Supervised::StopRequested));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_ends_retries() {
        let gate = Arc::new(RunGate::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let task = {
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                supervise(&RetryPolicy::default(), &gate, "read", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(transient())
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.halt();
        let result = task.await.unwrap();
        assert!(matches!(result, Supervised::StopRequested));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn result_discarded_when_stopped_mid_flight() {
        let gate = RunGate::new();
        let result = supervise(&RetryPolicy::default(), &gate, "submit", || async {
            gate.halt();
            Ok(7)
        })
        .await;
        assert!(matches!(result, Supervised::StopRequested));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_sleep_wakes_on_halt() {
        let gate = Arc::new(RunGate::new());
        let sleeper = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.sleep(Duration::from_secs(300)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.halt();
        assert!(!sleeper.await.unwrap());
    }
}
