//! IPC wire types shared by the queue-owner server (4.B) and the submitter
//! client (4.G). NDJSON: one of these per line, either direction.

use crate::record::SessionRecord;
use acpx_core::PermissionMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// JSON contents of the lease lock file (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOwnerRecord {
    pub pid: u32,
    pub session_id: String,
    pub socket_path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A request frame sent by a submitter to the owner (§4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueRequest {
    SubmitPrompt {
        request_id: String,
        message: String,
        #[serde(default)]
        permission_mode: PermissionMode,
        #[serde(default)]
        non_interactive_permissions: Option<BTreeMap<String, Value>>,
        timeout_ms: Option<u64>,
        wait_for_completion: bool,
    },
    CancelPrompt {
        request_id: String,
    },
    SetMode {
        request_id: String,
        mode_id: String,
        timeout_ms: Option<u64>,
    },
    SetConfigOption {
        request_id: String,
        config_id: String,
        value: Value,
        timeout_ms: Option<u64>,
    },
}

impl QueueRequest {
    pub fn request_id(&self) -> &str {
        match self {
            QueueRequest::SubmitPrompt { request_id, .. }
            | QueueRequest::CancelPrompt { request_id }
            | QueueRequest::SetMode { request_id, .. }
            | QueueRequest::SetConfigOption { request_id, .. } => request_id,
        }
    }
}

/// Summary returned in the `result` frame for a completed prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSendResult {
    pub stop_reason: String,
    pub permission_stats: PermissionStats,
    pub record: SessionRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionStats {
    pub approved: u32,
    pub denied: u32,
    pub auto_approved: u32,
    pub auto_denied: u32,
}

/// A response frame sent by the owner back to a submitter (§4.B / §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueResponse {
    Accepted {
        request_id: String,
    },
    /// An opaque ACP JSON-RPC 2.0 frame, forwarded verbatim.
    Event {
        request_id: String,
        message: Value,
    },
    Result {
        request_id: String,
        #[serde(flatten)]
        result: SessionSendResult,
    },
    CancelResult {
        request_id: String,
        cancelled: bool,
    },
    SetModeResult {
        request_id: String,
        applied: bool,
    },
    SetConfigOptionResult {
        request_id: String,
        applied: bool,
    },
    Error {
        request_id: String,
        code: String,
        detail_code: Option<String>,
        message: String,
    },
}

impl QueueResponse {
    pub fn request_id(&self) -> &str {
        match self {
            QueueResponse::Accepted { request_id }
            | QueueResponse::Event { request_id, .. }
            | QueueResponse::Result { request_id, .. }
            | QueueResponse::CancelResult { request_id, .. }
            | QueueResponse::SetModeResult { request_id, .. }
            | QueueResponse::SetConfigOptionResult { request_id, .. }
            | QueueResponse::Error { request_id, .. } => request_id,
        }
    }

    /// Terminal frames end a connection; `Accepted` and `Event` do not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueResponse::Accepted { .. } | QueueResponse::Event { .. })
    }

    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        detail_code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        QueueResponse::Error {
            request_id: request_id.into(),
            code: code.into(),
            detail_code: detail_code.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Payload the owner-bootstrapper passes via `ACPX_QUEUE_OWNER_PAYLOAD` so
/// the detached owner process has no CLI-parsing dependency (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOwnerPayload {
    pub session_id: String,
    pub agent_command: String,
    pub cwd: String,
    pub name: Option<String>,
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub auth: BTreeMap<String, String>,
    pub ttl_ms: u64,
    #[serde(default)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_prompt_round_trips_through_json() {
        let req = QueueRequest::SubmitPrompt {
            request_id: "r1".to_string(),
            message: "hello".to_string(),
            permission_mode: PermissionMode::ApproveAll,
            non_interactive_permissions: None,
            timeout_ms: Some(5000),
            wait_for_completion: true,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"submit_prompt\""));
        let back: QueueRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id(), "r1");
    }

    #[test]
    fn error_response_carries_detail_code() {
        let resp = QueueResponse::error("r1", "RUNTIME", Some("QUEUE_REQUEST_INVALID"), "bad");
        assert!(resp.is_terminal());
        match resp {
            QueueResponse::Error { detail_code, .. } => {
                assert_eq!(detail_code.as_deref(), Some("QUEUE_REQUEST_INVALID"));
            }
            _ => panic!("expected error variant"),
        }
    }

    #[test]
    fn accepted_and_event_are_not_terminal() {
        assert!(!QueueResponse::Accepted {
            request_id: "r1".to_string()
        }
        .is_terminal());
        assert!(!QueueResponse::Event {
            request_id: "r1".to_string(),
            message: Value::Null
        }
        .is_terminal());
    }
}
