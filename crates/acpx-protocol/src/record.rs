//! `SessionRecord` and its nested value types (§3 DATA MODEL).
//!
//! These are pure data — no file I/O lives here. Reading and atomically
//! writing records is the job of the owner's record store (`acpx-daemon`);
//! this module only owns the shape and the (de)serialization contract,
//! including the snake_case key policy acpx enforces on its own fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Why the agent child most recently stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProcessExit,
    ProcessClose,
    PipeClose,
    ConnectionClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastAgentExit {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub at: DateTime<Utc>,
    pub reason: ExitReason,
    /// True iff the child disappeared while a prompt was active and the
    /// owner was not already shutting down.
    #[serde(default)]
    pub unexpected_during_prompt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogMeta {
    pub active_path: String,
    pub segment_count: u32,
    pub max_segment_bytes: u64,
    pub max_segments: u32,
    pub last_write_at: Option<DateTime<Utc>>,
    pub last_write_error: Option<String>,
}

impl Default for EventLogMeta {
    fn default() -> Self {
        Self {
            active_path: String::new(),
            segment_count: 0,
            max_segment_bytes: crate::DEFAULT_MAX_SEGMENT_BYTES,
            max_segments: crate::DEFAULT_MAX_SEGMENTS,
            last_write_at: None,
            last_write_error: None,
        }
    }
}

/// A short, human-scannable preview of a past prompt turn. Kept small
/// deliberately — the full transcript lives in the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnHistoryEntry {
    pub request_id: String,
    pub preview: String,
    pub at: DateTime<Utc>,
}

/// Persisted, one file per session (§6: `<home>/.acpx/sessions/<urlencoded(recordId)>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub record_id: String,
    pub acp_session_id: String,
    pub agent_session_id: Option<String>,
    pub agent_command: String,
    pub cwd: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub last_prompt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub agent_started_at: Option<DateTime<Utc>>,
    pub last_agent_exit: Option<LastAgentExit>,
    #[serde(default)]
    pub last_seq: u64,
    pub last_request_id: Option<String>,
    pub event_log: EventLogMeta,
    #[serde(default)]
    pub turn_history: Vec<TurnHistoryEntry>,
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub agent_capabilities: BTreeMap<String, Value>,
    /// Unknown keys round-trip verbatim (§8: "unknown optional keys are
    /// preserved"), so a record written by a newer acpx survives being
    /// loaded and re-saved by an older one.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `(agentCommand, cwd, name?)` — identifies a conversational session
/// independently of its ACP id. Closed records are excluded from scope
/// lookup by the caller, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScopeKey {
    pub agent_command: String,
    pub cwd: String,
    pub name: Option<String>,
}

impl SessionRecord {
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey {
            agent_command: self.agent_command.clone(),
            cwd: self.cwd.clone(),
            name: self.name.clone(),
        }
    }

    pub fn matches_scope(&self, scope: &ScopeKey) -> bool {
        self.agent_command == scope.agent_command
            && self.cwd == scope.cwd
            && self.name == scope.name
    }

    /// URL-encoded filename stem for this record, per §6.
    pub fn file_stem(&self) -> String {
        urlencoding::encode(&self.record_id).into_owned()
    }
}

pub fn serialize_record(record: &SessionRecord) -> serde_json::Result<String> {
    serde_json::to_string_pretty(record)
}

pub fn parse_record(json: &str) -> serde_json::Result<SessionRecord> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SessionRecord {
        SessionRecord {
            record_id: "abc123".to_string(),
            acp_session_id: "sess-1".to_string(),
            agent_session_id: None,
            agent_command: "my-agent --flag".to_string(),
            cwd: "/home/user/project".to_string(),
            name: None,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            last_prompt_at: None,
            closed: false,
            closed_at: None,
            pid: Some(1234),
            agent_started_at: None,
            last_agent_exit: None,
            last_seq: 0,
            last_request_id: None,
            event_log: EventLogMeta::default(),
            turn_history: Vec::new(),
            protocol_version: None,
            agent_capabilities: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let record = sample_record();
        let json = serialize_record(&record).unwrap();
        let parsed = parse_record(&json).unwrap();
        assert_eq!(parsed.record_id, record.record_id);
        assert_eq!(parsed.agent_command, record.agent_command);
        assert_eq!(parsed.cwd, record.cwd);
    }

    #[test]
    fn unknown_keys_are_preserved_across_round_trip() {
        let mut json: Value = serde_json::to_value(sample_record()).unwrap();
        json.as_object_mut()
            .unwrap()
            .insert("futureField".to_string(), Value::Bool(true));

        let parsed: SessionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.extra.get("futureField"), Some(&Value::Bool(true)));

        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(
            reserialized.get("futureField"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn scope_key_ignores_acp_session_id() {
        let mut a = sample_record();
        let mut b = sample_record();
        a.acp_session_id = "sess-a".to_string();
        b.acp_session_id = "sess-b".to_string();
        assert_eq!(a.scope_key(), b.scope_key());
    }

    #[test]
    fn file_stem_url_encodes_record_id() {
        let mut record = sample_record();
        record.record_id = "a/b c".to_string();
        assert_eq!(record.file_stem(), "a%2Fb%20c");
    }
}
