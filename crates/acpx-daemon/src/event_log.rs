//! Event log append + segment rotation (§4.H, §6).
//!
//! Layout per session, all siblings of the record itself:
//! `<stem>.stream.ndjson` (active), `<stem>.stream.<n>.ndjson` for
//! `1..=maxSegments`, and `<stem>.stream.lock` for the advisory mutex
//! guarding appends.

use acpx_protocol::record::{EventLogMeta, SessionRecord};
use acpx_protocol::{DEFAULT_MAX_SEGMENTS, DEFAULT_MAX_SEGMENT_BYTES};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(15);

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct EventLogPaths {
    pub active: PathBuf,
    pub lock: PathBuf,
    stem: PathBuf,
}

impl EventLogPaths {
    pub fn for_record(sessions_dir: &Path, record: &SessionRecord) -> Self {
        let stem = sessions_dir.join(record.file_stem());
        Self {
            active: Self::with_suffix(&stem, "stream.ndjson"),
            lock: Self::with_suffix(&stem, "stream.lock"),
            stem,
        }
    }

    fn with_suffix(stem: &Path, suffix: &str) -> PathBuf {
        let mut name = stem.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    pub fn segment(&self, n: u32) -> PathBuf {
        Self::with_suffix(&self.stem, &format!("stream.{n}.ndjson"))
    }
}

/// Holds the advisory lock file for the duration of an append batch;
/// released on drop (every exit path per §5).
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    async fn acquire(path: &Path) -> io::Result<Self> {
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(_) => return Ok(Self { path: path.to_path_buf() }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Append `messages` to the active segment, rotating first if the next
/// line would overflow `maxSegmentBytes`, and update `record.event_log` /
/// `lastSeq` / `lastRequestId` / `lastUsedAt` in place (§4.H). Does not
/// persist `record` itself — the caller writes it via [`crate::store`].
pub async fn append_messages(
    sessions_dir: &Path,
    record: &mut SessionRecord,
    messages: &[Value],
    checkpoint: bool,
) -> Result<(), EventLogError> {
    let paths = EventLogPaths::for_record(sessions_dir, record);
    std::fs::create_dir_all(sessions_dir)?;

    let _lock = LockGuard::acquire(&paths.lock).await?;

    if record.event_log.active_path.is_empty() {
        record.event_log.active_path = paths.active.to_string_lossy().into_owned();
        record.event_log.max_segment_bytes = DEFAULT_MAX_SEGMENT_BYTES;
        record.event_log.max_segments = DEFAULT_MAX_SEGMENTS;
    }

    for message in messages {
        let line = serde_json::to_string(message)?;
        let line_len = line.len() as u64 + 1; // + newline

        let current_size = std::fs::metadata(&paths.active).map(|m| m.len()).unwrap_or(0);
        if current_size > 0 && current_size + line_len > record.event_log.max_segment_bytes {
            rotate(&paths, record.event_log.max_segments)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.active)?;
        use std::io::Write;
        writeln!(file, "{line}")?;

        record.last_seq += 1;
        if let Some(id) = message.get("requestId").and_then(Value::as_str) {
            record.last_request_id = Some(id.to_string());
        }
        record.last_used_at = chrono::Utc::now();
        record.event_log.last_write_at = Some(record.last_used_at);
        record.event_log.last_write_error = None;
        record.event_log.segment_count = count_segments(&paths, record.event_log.max_segments);
    }

    if checkpoint {
        record.last_prompt_at = Some(chrono::Utc::now());
    }

    Ok(())
}

/// Delete segment `maxSegments`, shift `1..maxSegments-1` upward by one,
/// then rename `active` to segment 1 (§4.H).
fn rotate(paths: &EventLogPaths, max_segments: u32) -> io::Result<()> {
    if max_segments == 0 {
        let _ = std::fs::remove_file(&paths.active);
        return Ok(());
    }

    let oldest = paths.segment(max_segments);
    let _ = std::fs::remove_file(&oldest);

    let mut n = max_segments;
    while n > 1 {
        let from = paths.segment(n - 1);
        let to = paths.segment(n);
        if from.exists() {
            std::fs::rename(&from, &to)?;
        }
        n -= 1;
    }

    if paths.active.exists() {
        std::fs::rename(&paths.active, paths.segment(1))?;
    }

    Ok(())
}

fn count_segments(paths: &EventLogPaths, max_segments: u32) -> u32 {
    (1..=max_segments).filter(|n| paths.segment(*n).exists()).count() as u32
}

/// Initialize the metadata stub for a record that has never appended
/// anything (used when first creating a record).
pub fn initial_meta(sessions_dir: &Path, record: &SessionRecord) -> EventLogMeta {
    let paths = EventLogPaths::for_record(sessions_dir, record);
    EventLogMeta {
        active_path: paths.active.to_string_lossy().into_owned(),
        segment_count: 0,
        max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
        max_segments: DEFAULT_MAX_SEGMENTS,
        last_write_at: None,
        last_write_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acpx_protocol::record::EventLogMeta as Meta;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample() -> SessionRecord {
        SessionRecord {
            record_id: "r1".to_string(),
            acp_session_id: "s1".to_string(),
            agent_session_id: None,
            agent_command: "agent".to_string(),
            cwd: "/proj".to_string(),
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
            event_log: Meta::default(),
            turn_history: Vec::new(),
            protocol_version: None,
            agent_capabilities: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn append_bumps_seq_and_writes_line() {
        let dir = tempdir().unwrap();
        let mut record = sample();
        append_messages(dir.path(), &mut record, &[json!({"hello": "world"})], false)
            .await
            .unwrap();

        assert_eq!(record.last_seq, 1);
        let paths = EventLogPaths::for_record(dir.path(), &record);
        let contents = std::fs::read_to_string(&paths.active).unwrap();
        assert!(contents.contains("hello"));
    }

    #[tokio::test]
    async fn append_tracks_last_request_id() {
        let dir = tempdir().unwrap();
        let mut record = sample();
        append_messages(
            dir.path(),
            &mut record,
            &[json!({"requestId": "r42", "x": 1})],
            false,
        )
        .await
        .unwrap();
        assert_eq!(record.last_request_id.as_deref(), Some("r42"));
    }

    #[tokio::test]
    async fn rotation_moves_active_to_segment_one() {
        let dir = tempdir().unwrap();
        let mut record = sample();
        record.event_log.max_segment_bytes = 10; // force rotation almost immediately

        append_messages(dir.path(), &mut record, &[json!({"a": 1})], false)
            .await
            .unwrap();
        append_messages(dir.path(), &mut record, &[json!({"b": 2})], false)
            .await
            .unwrap();

        let paths = EventLogPaths::for_record(dir.path(), &record);
        assert!(paths.segment(1).exists());
        assert!(paths.active.exists());
    }

    #[tokio::test]
    async fn lock_file_is_released_after_append() {
        let dir = tempdir().unwrap();
        let mut record = sample();
        append_messages(dir.path(), &mut record, &[json!({"a": 1})], false)
            .await
            .unwrap();

        let paths = EventLogPaths::for_record(dir.path(), &record);
        assert!(!paths.lock.exists());
    }
}
