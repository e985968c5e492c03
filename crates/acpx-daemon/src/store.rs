//! Record & event-log I/O (§4.H): atomic record writes, scope lookup, and
//! the directory-walk-upward `findSession` resolution.

use acpx_protocol::record::{parse_record, serialize_record, ScopeKey, SessionRecord};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// `<home>/.acpx/sessions`.
pub fn sessions_dir(home: &Path) -> PathBuf {
    home.join(".acpx").join("sessions")
}

pub fn record_path(home: &Path, record: &SessionRecord) -> PathBuf {
    sessions_dir(home).join(format!("{}.json", record.file_stem()))
}

/// Write `record` atomically: write to a pid/timestamp-scoped temp file
/// in the same directory, then rename over the destination (§4.H).
pub fn write_record(home: &Path, record: &SessionRecord) -> Result<(), StoreError> {
    let dir = sessions_dir(home);
    std::fs::create_dir_all(&dir)?;

    let dest = record_path(home, record);
    let tmp = dir.join(format!(
        "{}.{}.{}.tmp",
        record.file_stem(),
        std::process::id(),
        record.last_used_at.timestamp_millis()
    ));

    let json = serialize_record(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(())
}

/// Read a single record, tolerating absence and corruption by returning
/// `Ok(None)` rather than an error — corrupt/missing files are simply
/// excluded from listings (§4.H).
pub fn read_record(path: &Path) -> Option<SessionRecord> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_record(&contents).ok()
}

/// Look up a single record by its `recordId`, e.g. the session id a
/// detached owner receives in its bootstrap payload (§6).
pub fn read_record_by_id(home: &Path, record_id: &str) -> Option<SessionRecord> {
    let stem = urlencoding::encode(record_id).into_owned();
    read_record(&sessions_dir(home).join(format!("{stem}.json")))
}

/// List every parseable record under `<home>/.acpx/sessions`.
pub fn list_records(home: &Path) -> Vec<SessionRecord> {
    let dir = sessions_dir(home);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("json"))
        .filter_map(|e| read_record(&e.path()))
        .collect()
}

/// `findSession` scope lookup (§4.H): filter by `agentCommand`, exact
/// `cwd`, and `name` match (or both undefined); excludes closed records
/// unless `include_closed`.
pub fn find_session(home: &Path, scope: &ScopeKey, include_closed: bool) -> Option<SessionRecord> {
    list_records(home)
        .into_iter()
        .filter(|r| include_closed || !r.closed)
        .find(|r| r.matches_scope(scope))
}

/// Walk from `cwd` upward to a boundary (the first ancestor containing a
/// `.git` directory, else `cwd` itself) trying the scope match with each
/// level's path substituted for `cwd`; first hit wins (§4.H).
pub fn find_session_upward(
    home: &Path,
    agent_command: &str,
    start_cwd: &Path,
    name: Option<&str>,
    include_closed: bool,
) -> Option<SessionRecord> {
    let boundary = git_root(start_cwd).unwrap_or_else(|| start_cwd.to_path_buf());

    let mut cursor = start_cwd.to_path_buf();
    loop {
        let scope = ScopeKey {
            agent_command: agent_command.to_string(),
            cwd: cursor.to_string_lossy().into_owned(),
            name: name.map(str::to_string),
        };
        if let Some(record) = find_session(home, &scope, include_closed) {
            return Some(record);
        }

        if cursor == boundary {
            return None;
        }
        match cursor.parent() {
            Some(parent) => cursor = parent.to_path_buf(),
            None => return None,
        }
    }
}

fn git_root(start: &Path) -> Option<PathBuf> {
    let mut cursor = start;
    loop {
        if cursor.join(".git").exists() {
            return Some(cursor.to_path_buf());
        }
        cursor = cursor.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acpx_protocol::record::EventLogMeta;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample(record_id: &str, cwd: &str) -> SessionRecord {
        SessionRecord {
            record_id: record_id.to_string(),
            acp_session_id: "s1".to_string(),
            agent_session_id: None,
            agent_command: "agent --flag".to_string(),
            cwd: cwd.to_string(),
            name: None,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
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
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let home = tempdir().unwrap();
        let record = sample("r1", "/proj");
        write_record(home.path(), &record).unwrap();

        let path = record_path(home.path(), &record);
        let read = read_record(&path).unwrap();
        assert_eq!(read.record_id, "r1");
    }

    #[test]
    fn missing_file_reads_as_none() {
        let home = tempdir().unwrap();
        assert!(read_record(&home.path().join("nope.json")).is_none());
    }

    #[test]
    fn corrupt_file_reads_as_none() {
        let home = tempdir().unwrap();
        let dir = sessions_dir(home.path());
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(read_record(&path).is_none());
    }

    #[test]
    fn find_session_matches_scope_and_excludes_closed() {
        let home = tempdir().unwrap();
        let mut open = sample("open", "/proj");
        let mut closed = sample("closed", "/proj");
        closed.closed = true;
        write_record(home.path(), &open).unwrap();
        write_record(home.path(), &closed).unwrap();

        let scope = ScopeKey {
            agent_command: "agent --flag".to_string(),
            cwd: "/proj".to_string(),
            name: None,
        };
        let found = find_session(home.path(), &scope, false).unwrap();
        assert_eq!(found.record_id, "open");

        open.closed = false;
        let found_with_closed = find_session(home.path(), &scope, true);
        assert!(found_with_closed.is_some());
    }

    #[test]
    fn find_session_upward_walks_to_git_root() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join(".git")).unwrap();
        let sub = repo.path().join("a").join("b");
        std::fs::create_dir_all(&sub).unwrap();

        let record = sample("top", &repo.path().to_string_lossy());
        write_record(home.path(), &record).unwrap();

        let found = find_session_upward(home.path(), "agent --flag", &sub, None, false);
        assert!(found.is_some());
        assert_eq!(found.unwrap().record_id, "top");
    }

    #[test]
    fn find_session_upward_returns_none_past_boundary() {
        let home = tempdir().unwrap();
        let repo = tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join(".git")).unwrap();
        let sub = repo.path().join("a");
        std::fs::create_dir_all(&sub).unwrap();

        assert!(find_session_upward(home.path(), "agent --flag", &sub, None, false).is_none());
    }
}
