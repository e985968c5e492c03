//! Session resolution for the CLI front-end: find the record scoped to
//! `(agentCommand, cwd, name?)` (§4.H `findSession` / directory-walk
//! lookup), or create a fresh one.

use acpx_daemon::{event_log, store};
use acpx_protocol::record::{EventLogMeta, SessionRecord};
use acpx_protocol::{AcpxError, Origin};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;

/// Find the session scoped to this command invocation, walking upward
/// toward the git root the way an editor would, or create a brand-new
/// record if none exists.
///
/// The fresh record's `acpSessionId` is a placeholder identical to its
/// own `recordId` — guaranteed not to exist on the agent side, so the
/// owner's first `loadSession` attempt fails and falls back to
/// `newSession` (§7 recovery policy (a)), which then persists the real id.
pub fn resolve_or_create(
    home: &Path,
    agent_command: &str,
    cwd: &Path,
    name: Option<&str>,
) -> Result<SessionRecord, AcpxError> {
    if let Some(record) = store::find_session_upward(home, agent_command, cwd, name, false) {
        return Ok(record);
    }

    let record_id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let mut record = SessionRecord {
        record_id: record_id.clone(),
        acp_session_id: record_id,
        agent_session_id: None,
        agent_command: agent_command.to_string(),
        cwd: cwd.to_string_lossy().into_owned(),
        name: name.map(str::to_string),
        created_at: now,
        last_used_at: now,
        last_prompt_at: None,
        closed: false,
        closed_at: None,
        pid: None,
        agent_started_at: None,
        last_agent_exit: None,
        last_seq: 0,
        last_request_id: None,
        event_log: EventLogMeta::default(),
        turn_history: Vec::new(),
        protocol_version: None,
        agent_capabilities: BTreeMap::new(),
        extra: BTreeMap::new(),
    };
    record.event_log = event_log::initial_meta(&store::sessions_dir(home), &record);

    store::write_record(home, &record)
        .map_err(|e| AcpxError::runtime(Origin::Runtime, format!("failed to write new session record: {e}")))?;

    Ok(record)
}

/// Resolve an explicit `recordId`, or fall back to scope resolution when
/// none was given (used by `show`/`close`, which operate on an existing
/// record and must not silently create one).
pub fn resolve_existing(
    home: &Path,
    record_id: Option<&str>,
    agent_command: &str,
    cwd: &Path,
    name: Option<&str>,
) -> Result<SessionRecord, AcpxError> {
    match record_id {
        Some(id) => store::read_record_by_id(home, id)
            .ok_or_else(|| AcpxError::no_session(Origin::Cli, format!("no session record for {id}"))),
        None => store::find_session_upward(home, agent_command, cwd, name, true)
            .ok_or_else(|| AcpxError::no_session(Origin::Cli, "no session scoped to this agent command and cwd")),
    }
}
