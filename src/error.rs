//! Error types for the punch automation.

/// Failures reported by a portal session.
///
/// Every variant is treated as transient by the retry supervisor; the
/// distinction only drives status messages and logs.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// The automation driver could not be launched.
    #[error("failed to launch portal driver: {0}")]
    Spawn(#[source] std::io::Error),

    /// Credentials were rejected by the portal.
    #[error("portal login rejected: {0}")]
    Auth(String),

    /// A page failed to load or an expected element never appeared.
    #[error("portal navigation failed: {0}")]
    Navigation(String),

    /// The driver did not answer within the request deadline.
    #[error("portal request timed out after {timeout_secs}s")]
    Timeout {
        /// Deadline that expired, in seconds.
        timeout_secs: u64,
    },

    /// The punch button could not be clicked.
    #[error("portal punch action failed: {0}")]
    Click(String),

    /// Diagnostic snapshot capture failed.
    #[error("portal snapshot failed: {0}")]
    Snapshot(String),

    /// The driver spoke something other than the expected protocol.
    #[error("portal driver protocol error: {0}")]
    Protocol(String),

    /// The driver process exited while a request was outstanding.
    #[error("portal driver exited unexpectedly (exit code: {exit_code:?})")]
    DriverExited {
        /// Exit code, if the process was reaped.
        exit_code: Option<i32>,
    },
}

impl PortalError {
    /// Returns `true` when the portal rejected the credentials.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Top-level error type for the punch automation.
#[derive(Debug, thiserror::Error)]
pub enum PontoError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Schedule definition or schedule store error.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Portal session error.
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// A submitted punch never showed up on the portal.
    #[error("punch for {target} not confirmed after {attempts} verification attempts")]
    Verification {
        /// Target time that was submitted ("HH:MM").
        target: String,
        /// Number of verification reads performed.
        attempts: u32,
    },

    /// Notification delivery error.
    #[error("notifier error: {0}")]
    Notifier(String),

    /// Credential resolution error.
    #[error("credential error: {0}")]
    Credentials(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was stopped while the operation was pending.
    #[error("stop requested")]
    StopRequested,

    /// Retries were exhausted and the run was torn down.
    #[error("critical failure: {0}")]
    Critical(String),
}

impl PontoError {
    /// Returns `true` for failures the supervisor may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Portal(_) | Self::Verification { .. } | Self::Io(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PontoError>;
