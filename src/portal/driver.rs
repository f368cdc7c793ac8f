//! Portal adapter backed by an external automation driver process.
//!
//! Every [`PortalConnector::open_session`] call spawns the configured
//! driver command, performs a `driver.handshake` and hands back a
//! [`DriverSession`] that forwards each capability as one JSON-RPC
//! request. The child process is killed when the session is dropped, so
//! an abandoned session never leaks a browser.

use super::protocol::{
    DriverMessage, HandshakeParams, HandshakeResult, JsonRpcRequest, LoginParams,
    METHOD_CLOSE, METHOD_HANDSHAKE, METHOD_LOGIN, METHOD_READ_PUNCHES, METHOD_SNAPSHOT,
    METHOD_SUBMIT_PUNCH, ReadPunchesResult, SnapshotParams, SnapshotResult,
};
use super::{ObservedPunch, PortalConnector, PortalSession, SnapshotArtifact};
use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::error::PortalError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;

/// Maximum bytes for a single JSON line from the driver (100 KB).
const MAX_LINE_BYTES: usize = 100 * 1024;

/// Deadline for the handshake and the best-effort close request.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches driver processes.
#[derive(Debug, Clone)]
pub struct DriverConnector {
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
    snapshot_dir: Option<PathBuf>,
}

impl DriverConnector {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            request_timeout: Duration::from_secs(60),
            snapshot_dir: None,
        }
    }

    /// Connector configured from the `[portal]` config section.
    pub fn from_config(config: &PortalConfig) -> Self {
        Self {
            command: config.driver_command.clone(),
            args: config.driver_args.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            snapshot_dir: config.snapshot_dir.clone(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl PortalConnector for DriverConnector {
    async fn open_session(&self) -> Result<Box<dyn PortalSession>, PortalError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(PortalError::Spawn)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(PortalError::Protocol("driver stdio not captured".to_owned()));
        };

        tracing::debug!(command = %self.command, pid = ?child.id(), "portal driver spawned");

        let mut session = DriverSession {
            child: Some(child),
            comm: DriverComm::new(stdin, stdout),
            next_id: 1,
            request_timeout: self.request_timeout,
            snapshot_dir: self.snapshot_dir.clone(),
        };

        let params = serde_json::to_value(HandshakeParams {
            client: "ponto".to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
        })?;
        let result = session
            .call_with_deadline(METHOD_HANDSHAKE, Some(params), CONTROL_TIMEOUT)
            .await?;
        let hello: HandshakeResult = serde_json::from_value(result)?;
        tracing::info!(driver = %hello.name, version = %hello.version, "portal driver ready");

        Ok(Box::new(session))
    }
}

/// A live driver process.
pub struct DriverSession {
    child: Option<Child>,
    comm: DriverComm,
    next_id: u64,
    request_timeout: Duration,
    snapshot_dir: Option<PathBuf>,
}

impl fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSession")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl DriverSession {
    async fn call(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, PortalError> {
        self.call_with_deadline(method, params, self.request_timeout)
            .await
    }

    async fn call_with_deadline(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Duration,
    ) -> Result<serde_json::Value, PortalError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = JsonRpcRequest::new(method, params, id);

        match self.comm.send_request(&request, deadline).await {
            Err(PortalError::DriverExited { .. }) => Err(PortalError::DriverExited {
                exit_code: self.reap_exit_code(),
            }),
            other => other,
        }
    }

    fn reap_exit_code(&mut self) -> Option<i32> {
        self.child
            .as_mut()
            .and_then(|child| child.try_wait().ok().flatten())
            .and_then(|status| status.code())
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

#[async_trait]
impl PortalSession for DriverSession {
    async fn login(&mut self, credentials: &Credentials) -> Result<(), PortalError> {
        let params = serde_json::to_value(LoginParams {
            folha: &credentials.folha,
            senha: &credentials.senha,
        })?;
        self.call(METHOD_LOGIN, Some(params)).await?;
        Ok(())
    }

    async fn read_todays_punches(
        &mut self,
        today: NaiveDate,
    ) -> Result<Vec<ObservedPunch>, PortalError> {
        let result = self.call(METHOD_READ_PUNCHES, None).await?;
        let rows: ReadPunchesResult = serde_json::from_value(result)?;

        let mut punches: Vec<ObservedPunch> = rows
            .punches
            .iter()
            .filter_map(|row| {
                let parsed = ObservedPunch::from_portal(&row.date, &row.time, today);
                if parsed.is_none() {
                    tracing::debug!(date = %row.date, time = %row.time, "skipping malformed punch row");
                }
                parsed
            })
            .collect();
        punches.sort();
        Ok(punches)
    }

    async fn submit_punch(&mut self) -> Result<(), PortalError> {
        self.call(METHOD_SUBMIT_PUNCH, None).await?;
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<SnapshotArtifact, PortalError> {
        let params = serde_json::to_value(SnapshotParams {
            dir: self
                .snapshot_dir
                .as_ref()
                .map(|dir| dir.display().to_string()),
        })?;
        let result = self
            .call(METHOD_SNAPSHOT, Some(params))
            .await
            .map_err(|e| PortalError::Snapshot(e.to_string()))?;
        let shot: SnapshotResult =
            serde_json::from_value(result).map_err(|e| PortalError::Snapshot(e.to_string()))?;
        Ok(SnapshotArtifact {
            path: PathBuf::from(shot.path),
        })
    }

    async fn close(&mut self) -> Result<(), PortalError> {
        if self.child.is_none() {
            return Ok(());
        }
        let outcome = self
            .call_with_deadline(METHOD_CLOSE, None, CONTROL_TIMEOUT)
            .await
            .map(|_| ());
        self.kill().await;
        outcome
    }
}

/// Line-oriented JSON-RPC transport over the driver's stdio.
struct DriverComm {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl DriverComm {
    fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin,
            stdout: BufReader::new(stdout),
        }
    }

    /// Sends `request` and waits up to `deadline` for its response.
    async fn send_request(
        &mut self,
        request: &JsonRpcRequest,
        deadline: Duration,
    ) -> Result<serde_json::Value, PortalError> {
        let line = request.to_line()?;

        tracing::debug!(method = %request.method, id = request.id, "sending driver request");

        self.write_line(&line).await?;

        timeout(deadline, self.read_response(request.id, deadline.as_secs()))
            .await
            .map_err(|_| PortalError::Timeout {
                timeout_secs: deadline.as_secs(),
            })?
    }

    async fn write_line(&mut self, line: &str) -> Result<(), PortalError> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(map_write_error)?;
        self.stdin.flush().await.map_err(map_write_error)
    }

    /// Reads messages until the one answering `expected_id`, logging any
    /// notifications on the way.
    async fn read_response(
        &mut self,
        expected_id: u64,
        timeout_secs: u64,
    ) -> Result<serde_json::Value, PortalError> {
        loop {
            match self.read_one_message().await? {
                DriverMessage::Notification(note) => {
                    tracing::debug!(method = %note.method, params = ?note.params, "driver notification");
                }
                DriverMessage::Response(resp) => {
                    if resp.id != expected_id {
                        return Err(PortalError::Protocol(format!(
                            "response id mismatch: expected {expected_id}, got {}",
                            resp.id
                        )));
                    }
                    return Ok(resp.result);
                }
                DriverMessage::Error(err) => {
                    if err.id != expected_id {
                        return Err(PortalError::Protocol(format!(
                            "error response id mismatch: expected {expected_id}, got {}",
                            err.id
                        )));
                    }
                    tracing::debug!(id = err.id, code = err.error.code, "driver returned error");
                    return Err(err.error.into_portal_error(timeout_secs));
                }
            }
        }
    }

    async fn read_one_message(&mut self) -> Result<DriverMessage, PortalError> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| PortalError::Protocol(format!("stdout read error: {e}")))?;

        if n == 0 {
            return Err(PortalError::DriverExited { exit_code: None });
        }

        if line.len() > MAX_LINE_BYTES {
            return Err(PortalError::Protocol(format!(
                "driver line exceeded {MAX_LINE_BYTES} bytes"
            )));
        }

        DriverMessage::parse(&line)
    }
}

fn map_write_error(e: std::io::Error) -> PortalError {
    if e.kind() == std::io::ErrorKind::BrokenPipe {
        tracing::warn!("driver stdin broken pipe, process exited");
        PortalError::DriverExited { exit_code: None }
    } else {
        PortalError::Protocol(format!("stdin write error: {e}"))
    }
}
