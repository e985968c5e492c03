//! Error taxonomy and exit-code mapping.
//!
//! Every error that can reach the CLI front-end is normalized into an
//! [`AcpxError`] carrying a [`ErrorKind`] (which maps directly onto a stable
//! exit code), an optional machine-readable `detail_code`, the subsystem
//! that raised it, whether retrying is meaningful, and — for errors that
//! originated on the ACP wire — the raw JSON-RPC error payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Stable process exit codes (§4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Timeout = 3,
    NoSession = 4,
    PermissionDenied = 5,
    Interrupted = 130,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

/// Coarse error category; each variant maps onto exactly one [`ExitCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Usage,
    NoSession,
    Timeout,
    PermissionDenied,
    Runtime,
}

impl ErrorKind {
    pub fn exit_code(self) -> ExitCode {
        match self {
            ErrorKind::Usage => ExitCode::Usage,
            ErrorKind::NoSession => ExitCode::NoSession,
            ErrorKind::Timeout => ExitCode::Timeout,
            ErrorKind::PermissionDenied => ExitCode::PermissionDenied,
            ErrorKind::Runtime => ExitCode::Error,
        }
    }
}

/// Which layer raised the error. Distinct from `ErrorKind`: an `Origin::Queue`
/// error can still carry any `ErrorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Cli,
    Queue,
    Runtime,
    Acp,
}

/// A normalized error, ready to be rendered by the output formatter or
/// forwarded verbatim to a submitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpxError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail_code: Option<String>,
    pub origin: Origin,
    pub retryable: bool,
    pub acp_payload: Option<Value>,
}

impl AcpxError {
    pub fn new(kind: ErrorKind, origin: Origin, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail_code: None,
            origin,
            retryable: false,
            acp_payload: None,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, Origin::Cli, message)
    }

    pub fn no_session(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoSession, origin, message)
    }

    pub fn timeout(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, origin, message).retryable(true)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, Origin::Runtime, message)
    }

    pub fn runtime(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, origin, message)
    }

    pub fn with_detail(mut self, detail_code: impl Into<String>) -> Self {
        self.detail_code = Some(detail_code.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_acp_payload(mut self, payload: Value) -> Self {
        self.acp_payload = Some(payload);
        self
    }

    pub fn exit_code(&self) -> ExitCode {
        self.kind.exit_code()
    }

    /// Classify a JSON-RPC error response per §4.I / §7: `-32002` (and the
    /// legacy `-32001`) mean the ACP session no longer exists; a
    /// case-insensitive `"session not found"` substring in the message is
    /// treated the same way when the error originated at runtime.
    pub fn from_jsonrpc_error(code: i64, message: &str, origin: Origin, payload: Value) -> Self {
        let is_session_not_found_code = code == -32002 || code == -32001;
        let is_session_not_found_text =
            origin == Origin::Runtime && message.to_lowercase().contains("session not found");

        if is_session_not_found_code || is_session_not_found_text {
            return Self::no_session(origin, message).with_acp_payload(payload);
        }

        Self::runtime(origin, message).with_acp_payload(payload)
    }

    /// `true` iff §7's fallback policy allows a `loadSession` failure to be
    /// retried via `newSession`: any `-32001`/`-32002` or message-based
    /// session-not-found is eligible, everything else is fatal.
    pub fn is_fallback_eligible_load_error(&self) -> bool {
        self.kind == ErrorKind::NoSession
    }
}

impl fmt::Display for AcpxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail_code {
            Some(detail) => write!(f, "{} ({})", self.message, detail),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AcpxError {}

impl From<acpx_core::ControlError> for AcpxError {
    fn from(err: acpx_core::ControlError) -> Self {
        if err.timed_out {
            Self::timeout(Origin::Queue, err.message).with_detail("QUEUE_CONTROL_REQUEST_FAILED")
        } else {
            Self::runtime(Origin::Queue, err.message)
        }
    }
}

impl From<std::io::Error> for AcpxError {
    fn from(err: std::io::Error) -> Self {
        Self::runtime(Origin::Runtime, err.to_string())
    }
}

impl From<serde_json::Error> for AcpxError {
    fn from(err: serde_json::Error) -> Self {
        Self::runtime(Origin::Runtime, err.to_string()).with_detail("QUEUE_REQUEST_PAYLOAD_INVALID_JSON")
    }
}

impl From<agent_client_protocol::Error> for AcpxError {
    fn from(err: agent_client_protocol::Error) -> Self {
        Self::runtime(Origin::Acp, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(i32::from(ErrorKind::Usage.exit_code()), 2);
        assert_eq!(i32::from(ErrorKind::NoSession.exit_code()), 4);
        assert_eq!(i32::from(ErrorKind::Timeout.exit_code()), 3);
        assert_eq!(i32::from(ErrorKind::PermissionDenied.exit_code()), 5);
        assert_eq!(i32::from(ErrorKind::Runtime.exit_code()), 1);
        assert_eq!(i32::from(ExitCode::Interrupted), 130);
        assert_eq!(i32::from(ExitCode::Success), 0);
    }

    #[test]
    fn classifies_resource_not_found_codes() {
        let err = AcpxError::from_jsonrpc_error(-32002, "gone", Origin::Acp, Value::Null);
        assert_eq!(err.kind, ErrorKind::NoSession);

        let err = AcpxError::from_jsonrpc_error(-32001, "gone", Origin::Acp, Value::Null);
        assert_eq!(err.kind, ErrorKind::NoSession);
    }

    #[test]
    fn classifies_message_based_session_not_found_only_at_runtime() {
        let err = AcpxError::from_jsonrpc_error(
            -32000,
            "Session NOT Found for id abc",
            Origin::Runtime,
            Value::Null,
        );
        assert_eq!(err.kind, ErrorKind::NoSession);

        let err = AcpxError::from_jsonrpc_error(
            -32000,
            "session not found",
            Origin::Acp,
            Value::Null,
        );
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn other_codes_fall_back_to_runtime() {
        let err = AcpxError::from_jsonrpc_error(-32603, "internal error", Origin::Acp, Value::Null);
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn timeout_is_retryable_by_default() {
        let err = AcpxError::timeout(Origin::Queue, "turn exceeded timeoutMs");
        assert!(err.retryable);
    }
}
