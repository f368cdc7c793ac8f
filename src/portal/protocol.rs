//! JSON-RPC 2.0 wire types for the portal automation driver.
//!
//! The driver is a separate process that owns the browser. It reads one
//! JSON request per line on stdin and answers with one JSON line on stdout.
//! Lines without an `id` are notifications and are only logged.
//!
//! ```json
//! {"jsonrpc":"2.0","method":"portal.read_punches","id":3}
//! {"jsonrpc":"2.0","result":{"punches":[{"date":"03/03","time":"08:02"}]},"id":3}
//! ```

use crate::error::PortalError;
use serde::{Deserialize, Serialize};

const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_HANDSHAKE: &str = "driver.handshake";
pub const METHOD_LOGIN: &str = "portal.login";
pub const METHOD_READ_PUNCHES: &str = "portal.read_punches";
pub const METHOD_SUBMIT_PUNCH: &str = "portal.submit_punch";
pub const METHOD_SNAPSHOT: &str = "portal.snapshot";
pub const METHOD_CLOSE: &str = "portal.close";

/// Driver-defined error codes.
pub const CODE_AUTH: i32 = -32001;
pub const CODE_NAVIGATION: i32 = -32002;
pub const CODE_TIMEOUT: i32 = -32003;
pub const CODE_CLICK: i32 = -32004;

/// A request sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: Option<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params,
            id,
        }
    }

    /// Serializes this request to a JSON line (with trailing newline).
    pub fn to_line(&self) -> Result<String, PortalError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: serde_json::Value,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Map a driver error onto the portal failure taxonomy.
    #[must_use]
    pub fn into_portal_error(self, timeout_secs: u64) -> PortalError {
        match self.code {
            CODE_AUTH => PortalError::Auth(self.message),
            CODE_NAVIGATION => PortalError::Navigation(self.message),
            CODE_TIMEOUT => PortalError::Timeout { timeout_secs },
            CODE_CLICK => PortalError::Click(self.message),
            code => PortalError::Protocol(format!("driver error {code}: {}", self.message)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub error: JsonRpcError,
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// One line received from the driver.
#[derive(Debug, Clone)]
pub enum DriverMessage {
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
    Notification(JsonRpcNotification),
}

impl DriverMessage {
    /// Parses a JSON line, picking the variant by field presence.
    pub fn parse(line: &str) -> Result<Self, PortalError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(PortalError::Protocol("empty message line".to_owned()));
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;

        let version = value.get("jsonrpc").and_then(|v| v.as_str());
        if version != Some(JSONRPC_VERSION) {
            return Err(PortalError::Protocol(format!(
                "expected jsonrpc version \"{JSONRPC_VERSION}\", got {version:?}"
            )));
        }

        let has_id = value.get("id").is_some();
        let has_result = value.get("result").is_some();
        let has_error = value.get("error").is_some();

        if has_id && has_result {
            Ok(Self::Response(serde_json::from_value(value)?))
        } else if has_id && has_error {
            Ok(Self::Error(serde_json::from_value(value)?))
        } else if !has_id {
            Ok(Self::Notification(serde_json::from_value(value)?))
        } else {
            Err(PortalError::Protocol(
                "message has id but neither result nor error field".to_owned(),
            ))
        }
    }
}

/// Parameters of `driver.handshake`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeParams {
    pub client: String,
    pub client_version: String,
}

/// Result of `driver.handshake`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResult {
    pub name: String,
    pub version: String,
}

/// Parameters of `portal.login`.
#[derive(Serialize)]
pub struct LoginParams<'a> {
    pub folha: &'a str,
    pub senha: &'a str,
}

/// A punch row as scraped by the driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PunchRow {
    /// `DD/MM`
    pub date: String,
    /// `HH:MM`
    pub time: String,
}

/// Result of `portal.read_punches`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadPunchesResult {
    #[serde(default)]
    pub punches: Vec<PunchRow>,
}

/// Parameters of `portal.snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotParams {
    /// Directory the driver should write the image into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Result of `portal.snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotResult {
    pub path: String,
}
