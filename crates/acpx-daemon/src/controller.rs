//! Turn controller (§4.C): the `idle → starting → active → idle` state
//! machine plus the dispatch loop that drives one [`AgentSupervisor`]
//! through its queued tasks.

use crate::event_log;
use crate::fallback;
use acpx_acp::{AcpError, AgentSupervisor};
use acpx_core::{ActiveSessionController, PermissionMode};
use acpx_protocol::queue::{PermissionStats, QueueResponse, SessionSendResult};
use acpx_protocol::record::SessionRecord;
use acpx_protocol::{ExitCode, Origin};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Starting,
    Active,
    Closing,
}

/// One unit of work handed to the controller by the server (§4.B/§4.C).
/// `send` streams `QueueResponse` frames back to the owning connection;
/// the controller writes exactly one terminal frame per task.
pub struct Task {
    pub kind: TaskKind,
    pub send: mpsc::UnboundedSender<QueueResponse>,
}

pub enum TaskKind {
    Submit {
        request_id: String,
        message: String,
        permission_mode: PermissionMode,
        non_interactive_permissions: Option<BTreeMap<String, Value>>,
        timeout_ms: Option<u64>,
    },
    Cancel {
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

/// What made the dispatch loop stop (§5: idle TTL, or owner shutdown).
pub enum ShutdownReason {
    IdleTimeout,
    Closed,
}

pub struct TurnController {
    state: Mutex<ControllerState>,
    pending_cancel: AtomicBool,
    supervisor: Mutex<Option<Arc<AgentSupervisor>>>,
    /// The supervisor's wire-event stream (§4.D.4 / §4.E): every JSON-RPC
    /// frame observed in either direction, drained and forwarded verbatim
    /// to the submitter while a turn is in flight (§4.B).
    events: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    record: Mutex<SessionRecord>,
    home: PathBuf,
    agent_command: String,
    auth: BTreeMap<String, String>,
}

impl TurnController {
    pub fn new(
        home: PathBuf,
        record: SessionRecord,
        agent_command: String,
        auth: BTreeMap<String, String>,
        supervisor: Option<Arc<AgentSupervisor>>,
    ) -> Self {
        Self {
            state: Mutex::new(ControllerState::Idle),
            pending_cancel: AtomicBool::new(false),
            supervisor: Mutex::new(supervisor),
            events: Mutex::new(None),
            record: Mutex::new(record),
            home,
            agent_command,
            auth,
        }
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.lock().await
    }

    pub async fn record_snapshot(&self) -> SessionRecord {
        self.record.lock().await.clone()
    }

    /// Swap in the supervisor (and its event stream) the owner built at
    /// startup, or built fresh after the previous agent child exited
    /// (§4.D).
    pub async fn attach_supervisor(&self, supervisor: Arc<AgentSupervisor>, events: mpsc::UnboundedReceiver<Value>) {
        *self.supervisor.lock().await = Some(supervisor);
        *self.events.lock().await = Some(events);
    }

    /// Drive tasks from `task_rx` until idle TTL elapses or the channel
    /// closes (§4.C dispatch loop, §5 idle TTL).
    pub async fn run(&self, mut task_rx: mpsc::UnboundedReceiver<Task>, ttl: Duration) -> ShutdownReason {
        loop {
            match tokio::time::timeout(ttl, task_rx.recv()).await {
                Ok(Some(task)) => self.dispatch(task).await,
                Ok(None) => return ShutdownReason::Closed,
                Err(_) => return ShutdownReason::IdleTimeout,
            }
        }
    }

    async fn dispatch(&self, task: Task) {
        if self.state().await == ControllerState::Closing {
            let response = QueueResponse::error(
                task_request_id(&task.kind),
                "RUNTIME",
                Some("QUEUE_OWNER_CLOSING"),
                "Queue owner is closing",
            );
            let _ = task.send.send(response);
            return;
        }

        match task.kind {
            TaskKind::Submit { request_id, message, permission_mode, non_interactive_permissions, timeout_ms } => {
                self.dispatch_submit(request_id, message, permission_mode, non_interactive_permissions, timeout_ms, task.send).await;
            }
            TaskKind::Cancel { request_id } => {
                self.dispatch_cancel(request_id, task.send).await;
            }
            TaskKind::SetMode { request_id, mode_id, timeout_ms } => {
                self.dispatch_set_mode(request_id, mode_id, timeout_ms, task.send).await;
            }
            TaskKind::SetConfigOption { request_id, config_id, value, timeout_ms } => {
                self.dispatch_set_config_option(request_id, config_id, value, timeout_ms, task.send).await;
            }
        }
    }

    async fn begin_turn(&self) {
        *self.state.lock().await = ControllerState::Starting;
    }

    async fn mark_prompt_active(&self) {
        let mut state = self.state.lock().await;
        if matches!(*state, ControllerState::Starting | ControllerState::Active) {
            *state = ControllerState::Active;
        }
    }

    async fn end_turn(&self) {
        let mut state = self.state.lock().await;
        if *state != ControllerState::Closing {
            *state = ControllerState::Idle;
        }
        self.pending_cancel.store(false, Ordering::SeqCst);
    }

    pub async fn begin_closing(&self) {
        *self.state.lock().await = ControllerState::Closing;
    }

    async fn dispatch_submit(
        &self,
        request_id: String,
        message: String,
        permission_mode: PermissionMode,
        _non_interactive_permissions: Option<BTreeMap<String, Value>>,
        timeout_ms: Option<u64>,
        send: mpsc::UnboundedSender<QueueResponse>,
    ) {
        self.begin_turn().await;

        let supervisor = self.supervisor.lock().await.clone();
        let Some(supervisor) = supervisor else {
            self.end_turn().await;
            let _ = send.send(QueueResponse::error(
                &request_id,
                "RUNTIME",
                Some("QUEUE_OWNER_NOT_READY"),
                "agent supervisor is not attached",
            ));
            return;
        };
        let _ = permission_mode; // carried through session config, not re-read here

        let session_id = {
            let record = self.record.lock().await;
            record.acp_session_id.clone()
        };

        self.mark_prompt_active().await;

        let run_prompt = supervisor.prompt(&session_id, &message);
        tokio::pin!(run_prompt);

        let mut events_guard = self.events.lock().await;
        // A timeout-less turn still needs a pinned `Sleep` for `select!` to
        // poll; give it an effectively unreachable deadline and gate the
        // arm on `timeout_ms.is_some()` instead.
        let sleep_duration = timeout_ms.map(Duration::from_millis).unwrap_or(Duration::from_secs(3600 * 24));
        let deadline = tokio::time::sleep(sleep_duration);
        tokio::pin!(deadline);

        let result = loop {
            let recv_events = async {
                match events_guard.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                outcome = &mut run_prompt => break Ok(outcome),
                event = recv_events => {
                    match event {
                        Some(event) => self.forward_event(&request_id, event, &send).await,
                        // Channel closed (supervisor torn down mid-turn):
                        // stop polling it rather than hot-spinning on the
                        // now-permanently-ready `None`.
                        None => { events_guard.take(); }
                    }
                }
                _ = &mut deadline, if timeout_ms.is_some() => {
                    break Err(AcpError::timeout(Origin::Runtime, "prompt exceeded timeoutMs"));
                }
            }
        };

        // The final `prompt` response is itself observed as a raw frame on
        // the event channel by the reader loop just before it unblocks
        // `run_prompt`; drain whatever is already buffered so it streams
        // as this turn's trailing events rather than leaking into the
        // next one.
        if let Some(rx) = events_guard.as_mut() {
            while let Ok(event) = rx.try_recv() {
                self.forward_event(&request_id, event, &send).await;
            }
        }
        drop(events_guard);

        let response = match result {
            Ok(Ok(value)) => {
                let stop_reason = value
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .unwrap_or("end_turn")
                    .to_string();

                let mut record = self.record.lock().await;
                let sessions_dir = crate::store::sessions_dir(&self.home);
                let _ = event_log::append_messages(&sessions_dir, &mut record, &[value], true).await;
                let _ = crate::store::write_record(&self.home, &record);

                QueueResponse::Result {
                    request_id: request_id.clone(),
                    result: SessionSendResult {
                        stop_reason,
                        permission_stats: PermissionStats::default(),
                        record: record.clone(),
                    },
                }
            }
            Ok(Err(e)) => queue_error_from(&request_id, &e),
            Err(e) => queue_error_from(&request_id, &e),
        };

        let _ = send.send(response);
        self.end_turn().await;
    }

    /// Append a wire-level event to the session's log (bumping `lastSeq`)
    /// and stream it to the submitter verbatim (§4.B, §8 event-frame law).
    async fn forward_event(&self, request_id: &str, event: Value, send: &mpsc::UnboundedSender<QueueResponse>) {
        {
            let mut record = self.record.lock().await;
            let sessions_dir = crate::store::sessions_dir(&self.home);
            let _ = event_log::append_messages(&sessions_dir, &mut record, &[event.clone()], false).await;
        }
        let _ = send.send(QueueResponse::Event { request_id: request_id.to_string(), message: event });
    }

    async fn dispatch_cancel(&self, request_id: String, send: mpsc::UnboundedSender<QueueResponse>) {
        let supervisor = self.supervisor.lock().await.clone();
        let state = self.state().await;

        let cancelled = if let Some(supervisor) = supervisor {
            if supervisor.has_active_prompt().await {
                let acked = supervisor.request_cancel_active_prompt().await;
                if acked {
                    self.pending_cancel.store(false, Ordering::SeqCst);
                }
                acked
            } else if matches!(state, ControllerState::Starting | ControllerState::Active) {
                self.pending_cancel.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        } else {
            false
        };

        let _ = send.send(QueueResponse::CancelResult { request_id, cancelled });
    }

    async fn dispatch_set_mode(
        &self,
        request_id: String,
        mode_id: String,
        timeout_ms: Option<u64>,
        send: mpsc::UnboundedSender<QueueResponse>,
    ) {
        let supervisor = self.supervisor.lock().await.clone();

        let response = match supervisor {
            Some(supervisor) => {
                let call = supervisor.set_session_mode(&mode_id);
                let outcome = match timeout_ms {
                    Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call).await,
                    None => Ok(call.await),
                };
                match outcome {
                    Ok(Ok(result)) => QueueResponse::SetModeResult { request_id, applied: result.applied },
                    Ok(Err(e)) => QueueResponse::error(&request_id, "RUNTIME", Some("QUEUE_CONTROL_REQUEST_FAILED"), e.message),
                    Err(_) => QueueResponse::error(&request_id, "TIMEOUT", Some("QUEUE_CONTROL_REQUEST_FAILED"), "setMode timed out"),
                }
            }
            None => {
                let record = self.record.lock().await;
                match fallback::run_set_mode(&self.home, &self.agent_command, &self.auth, &record, &mode_id, timeout_ms).await {
                    Ok(applied) => QueueResponse::SetModeResult { request_id, applied },
                    Err(e) => queue_error_from(&request_id, &e),
                }
            }
        };

        let _ = send.send(response);
    }

    async fn dispatch_set_config_option(
        &self,
        request_id: String,
        config_id: String,
        value: Value,
        timeout_ms: Option<u64>,
        send: mpsc::UnboundedSender<QueueResponse>,
    ) {
        let supervisor = self.supervisor.lock().await.clone();

        let response = match supervisor {
            Some(supervisor) => {
                let call = supervisor.set_session_config_option(&config_id, value);
                let outcome = match timeout_ms {
                    Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call).await,
                    None => Ok(call.await),
                };
                match outcome {
                    Ok(Ok(result)) => QueueResponse::SetConfigOptionResult { request_id, applied: result.applied },
                    Ok(Err(e)) => QueueResponse::error(&request_id, "RUNTIME", Some("QUEUE_CONTROL_REQUEST_FAILED"), e.message),
                    Err(_) => QueueResponse::error(&request_id, "TIMEOUT", Some("QUEUE_CONTROL_REQUEST_FAILED"), "setConfigOption timed out"),
                }
            }
            None => {
                let record = self.record.lock().await;
                match fallback::run_set_config_option(&self.home, &self.agent_command, &self.auth, &record, &config_id, value, timeout_ms).await {
                    Ok(applied) => QueueResponse::SetConfigOptionResult { request_id, applied },
                    Err(e) => queue_error_from(&request_id, &e),
                }
            }
        };

        let _ = send.send(response);
    }
}

fn task_request_id(kind: &TaskKind) -> &str {
    match kind {
        TaskKind::Submit { request_id, .. }
        | TaskKind::Cancel { request_id }
        | TaskKind::SetMode { request_id, .. }
        | TaskKind::SetConfigOption { request_id, .. } => request_id,
    }
}

fn queue_error_from(request_id: &str, error: &AcpError) -> QueueResponse {
    let code = match error.exit_code() {
        ExitCode::NoSession => "NO_SESSION",
        ExitCode::Timeout => "TIMEOUT",
        ExitCode::PermissionDenied => "PERMISSION_DENIED",
        ExitCode::Usage => "USAGE",
        _ => "RUNTIME",
    };
    QueueResponse::error(request_id, code, error.detail_code.as_deref(), error.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use acpx_protocol::record::EventLogMeta;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_record() -> SessionRecord {
        SessionRecord {
            record_id: "r1".to_string(),
            acp_session_id: "sess-1".to_string(),
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
            event_log: EventLogMeta::default(),
            turn_history: Vec::new(),
            protocol_version: None,
            agent_capabilities: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn cancel_without_supervisor_reports_not_cancelled() {
        let home = tempdir().unwrap();
        let controller = TurnController::new(
            home.path().to_path_buf(),
            sample_record(),
            "agent".to_string(),
            BTreeMap::new(),
            None,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        controller.dispatch_cancel("r1".to_string(), tx).await;
        match rx.recv().await.unwrap() {
            QueueResponse::CancelResult { cancelled, .. } => assert!(!cancelled),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_state_rejects_new_tasks() {
        let home = tempdir().unwrap();
        let controller = TurnController::new(
            home.path().to_path_buf(),
            sample_record(),
            "agent".to_string(),
            BTreeMap::new(),
            None,
        );
        controller.begin_closing().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        controller
            .dispatch(Task { kind: TaskKind::Cancel { request_id: "r1".to_string() }, send: tx })
            .await;

        match rx.recv().await.unwrap() {
            QueueResponse::Error { detail_code, .. } => {
                assert_eq!(detail_code.as_deref(), Some("QUEUE_OWNER_CLOSING"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn idle_ttl_elapses_into_shutdown() {
        let home = tempdir().unwrap();
        let controller = TurnController::new(
            home.path().to_path_buf(),
            sample_record(),
            "agent".to_string(),
            BTreeMap::new(),
            None,
        );
        let (_tx, rx) = mpsc::unbounded_channel::<Task>();
        let reason = controller.run(rx, Duration::from_millis(20)).await;
        assert!(matches!(reason, ShutdownReason::IdleTimeout));
    }
}
