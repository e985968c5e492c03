//! Submitter client (§4.G): resolves whether a session has a live owner,
//! connects to it (spawning a detached owner on first use), and streams
//! the request/response exchange back to the output formatter.

use acpx_protocol::queue::{QueueOwnerPayload, QueueRequest, QueueResponse};
use acpx_protocol::{AcpxError, Origin};
use acpx_rpc::{connect_unix, pid_is_alive, queues_dir, read_frame_value, read_lease, socket_path, write_frame, Conn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::BufReader;
use tracing::debug;

const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_BACKOFF: Duration = Duration::from_millis(50);

/// Outcome of one submit: either the full terminal frame (for
/// `waitForCompletion=true`), or a bare acknowledgement that the owner
/// accepted the task and will run it to completion unattended.
pub enum SubmitOutcome {
    Terminal(QueueResponse),
    Enqueued,
}

/// Drive one request end to end: connect-or-spawn, send, stream events to
/// `on_event`, and return the terminal frame (or an enqueue ack).
pub async fn submit(
    home: &Path,
    session_id: &str,
    request: QueueRequest,
    wait_for_completion: bool,
    spawn_payload: impl Fn() -> QueueOwnerPayload,
    mut on_event: impl FnMut(&str, &Value),
) -> Result<SubmitOutcome, AcpxError> {
    let mut conn = match connect_with_retry(home, session_id).await {
        Ok(conn) => conn,
        Err(ConnectError::NoOwner) => {
            spawn_detached_owner(home, session_id, &spawn_payload())?;
            connect_with_retry(home, session_id).await.map_err(|e| match e {
                ConnectError::NoOwner => AcpxError::no_session(Origin::Queue, "owner did not start")
                    .with_detail("QUEUE_DISCONNECTED_BEFORE_ACK")
                    .retryable(true),
                ConnectError::Io(err) => {
                    AcpxError::runtime(Origin::Queue, err.to_string()).with_detail("QUEUE_DISCONNECTED_BEFORE_ACK")
                }
            })?
        }
        Err(ConnectError::Io(err)) => {
            return Err(AcpxError::runtime(Origin::Queue, err.to_string()).with_detail("QUEUE_DISCONNECTED_BEFORE_ACK"))
        }
    };

    write_frame(&mut conn, &request)
        .await
        .map_err(|e| AcpxError::runtime(Origin::Queue, e.to_string()).with_detail("QUEUE_DISCONNECTED_BEFORE_ACK").retryable(true))?;

    let (read_half, _write_half) = tokio::io::split(conn);
    let mut reader = BufReader::new(read_half);

    let request_id = request.request_id().to_string();

    match read_frame_value(&mut reader).await {
        Ok(Some(value)) => match serde_json::from_value::<QueueResponse>(value) {
            Ok(QueueResponse::Accepted { .. }) => {}
            Ok(other) => {
                return Err(queue_protocol_error(format!("expected accepted, got {other:?}")));
            }
            Err(e) => return Err(queue_protocol_error(e.to_string())),
        },
        Ok(None) => {
            return Err(AcpxError::runtime(Origin::Queue, "owner closed the connection before accepting")
                .with_detail("QUEUE_DISCONNECTED_BEFORE_ACK")
                .retryable(true));
        }
        Err(e) => return Err(AcpxError::runtime(Origin::Queue, e.to_string()).with_detail("QUEUE_DISCONNECTED_BEFORE_ACK")),
    }

    if !wait_for_completion {
        return Ok(SubmitOutcome::Enqueued);
    }

    loop {
        match read_frame_value(&mut reader).await {
            Ok(Some(value)) => {
                let response: QueueResponse = serde_json::from_value(value).map_err(|e| queue_protocol_error(e.to_string()))?;
                match response {
                    QueueResponse::Event { message, .. } => on_event(&request_id, &message),
                    terminal => return Ok(SubmitOutcome::Terminal(terminal)),
                }
            }
            Ok(None) => {
                return Err(AcpxError::runtime(Origin::Queue, "owner closed the connection before completion")
                    .with_detail("QUEUE_DISCONNECTED_BEFORE_COMPLETION")
                    .retryable(true));
            }
            Err(e) => {
                return Err(AcpxError::runtime(Origin::Queue, e.to_string()).with_detail("QUEUE_DISCONNECTED_BEFORE_COMPLETION"))
            }
        }
    }
}

fn queue_protocol_error(detail: String) -> AcpxError {
    AcpxError::runtime(Origin::Queue, detail).with_detail("QUEUE_PROTOCOL_UNEXPECTED_FRAME")
}

enum ConnectError {
    NoOwner,
    Io(std::io::Error),
}

/// §4.G steps 1–2: read the lock, and if a (live, by pid) owner is
/// claimed, retry connecting to its socket with fixed backoff; give up
/// early if the owner's pid dies mid-retry.
async fn connect_with_retry(home: &Path, session_id: &str) -> Result<Conn, ConnectError> {
    let socket = socket_path(home, session_id);

    for attempt in 0..CONNECT_ATTEMPTS {
        match connect_unix(&socket).await {
            Ok(conn) => return Ok(conn),
            Err(e) if is_retryable_connect_err(&e) => {}
            Err(e) => return Err(ConnectError::Io(e)),
        }

        match read_lease(home, session_id) {
            Ok(Some(record)) if !pid_is_alive(record.pid) => {
                debug!(session_id, "owner pid died mid-retry, giving up");
                return Err(ConnectError::NoOwner);
            }
            Ok(None) if attempt > 0 => {
                // Lock existed a moment ago (or we just spawned an owner
                // that hasn't written it yet); either way there's nothing
                // to connect to right now.
                return Err(ConnectError::NoOwner);
            }
            _ => {}
        }

        tokio::time::sleep(CONNECT_BACKOFF).await;
    }

    Err(ConnectError::NoOwner)
}

fn is_retryable_connect_err(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused)
}

/// Spawn a detached owner process: re-exec the current binary with the
/// session payload passed via `ACPX_QUEUE_OWNER_PAYLOAD` so it needs no
/// CLI-parsing dependency of its own (§4.G, §6).
fn spawn_detached_owner(home: &Path, session_id: &str, payload: &QueueOwnerPayload) -> Result<(), AcpxError> {
    let exe = std::env::current_exe()
        .map_err(|e| AcpxError::runtime(Origin::Runtime, format!("could not resolve own executable path: {e}")))?;
    let payload_json = serde_json::to_string(payload)?;

    let log_path = owner_log_path(home, session_id);
    if let Some(dir) = log_path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| AcpxError::runtime(Origin::Runtime, format!("could not open owner log {}: {e}", log_path.display())))?;
    let log_file_err = log_file
        .try_clone()
        .map_err(|e| AcpxError::runtime(Origin::Runtime, e.to_string()))?;

    let mut command = std::process::Command::new(exe);
    command
        .env("ACPX_QUEUE_OWNER_PAYLOAD", payload_json)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::from(log_file))
        .stderr(std::process::Stdio::from(log_file_err));

    detach(&mut command);

    match command.spawn() {
        Ok(child) => {
            // Deliberately not `.wait()`-ed: this process is the owner's
            // parent only in the OS sense, it detaches into its own
            // session and outlives us.
            std::mem::drop(child);
            Ok(())
        }
        Err(e) => Err(AcpxError::runtime(Origin::Runtime, format!("failed to spawn queue owner: {e}"))),
    }
}

fn owner_log_path(home: &Path, session_id: &str) -> PathBuf {
    let key = acpx_rpc::lease_key(session_id);
    queues_dir(home).join(format!("{key}.log"))
}

#[cfg(unix)]
fn detach(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: `setsid` only affects the child after `fork`, before `exec`;
    // it takes no arguments that could alias or outlive this call.
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach(_command: &mut std::process::Command) {}

/// Whether the lock file claims a live owner right now, without trying to
/// connect (a cheap short-circuit before paying for a socket attempt).
pub fn has_live_owner(home: &Path, session_id: &str) -> bool {
    matches!(read_lease(home, session_id), Ok(Some(record)) if pid_is_alive(record.pid))
}
