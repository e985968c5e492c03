//! ACP client supervisor (§4.D): owns the agent child end to end — spawn,
//! handshake, the running client endpoint, and lifecycle observation —
//! and implements [`acpx_core::ActiveSessionController`] so the turn
//! controller (in `acpx-daemon`) can issue control RPCs without knowing
//! anything about transports or child processes.

use crate::client::{ClientEndpoint, ClientHandler};
use crate::command::{build_command, AgentCommandConfig};
use crate::error::{AcpError, Origin, Result};
use crate::handshake::{authenticate_if_needed, initialize, NoCredentialPolicy};
use crate::serializer::SessionUpdateSerializer;
use crate::terminal::TerminalManager;
use crate::transport::{next_request_id, AgentProcess, Transport};
use acpx_core::{ActiveSessionController, ControlError, ControlOutcome};
use acpx_core::PermissionMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct LastExit {
    pub code: Option<i32>,
    pub signal: Option<String>,
    pub at: Option<DateTime<Utc>>,
    pub reason: Option<acpx_protocol::ExitReason>,
    pub unexpected_during_prompt: bool,
}

#[derive(Debug, Clone)]
pub struct AgentLifecycle {
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub last_exit: Option<LastExit>,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub agent_command: String,
    pub cwd: PathBuf,
    pub auth: BTreeMap<String, String>,
    pub no_credential_policy: NoCredentialPolicy,
    pub permission_mode: PermissionMode,
    pub non_interactive_permissions: BTreeMap<String, Value>,
}

/// Quiescence window and overall deadline `loadSession`'s replay drain
/// waits on (§4.E); no fixed constant is named in the protocol itself, so
/// these are chosen generously for a cold resume against a slow adapter.
const REPLAY_IDLE_MS: u64 = 200;
const REPLAY_TIMEOUT_MS: u64 = 30_000;

struct LifecycleState {
    lifecycle: Mutex<AgentLifecycle>,
    shutting_down: AtomicBool,
    active_prompt: AtomicBool,
}

/// A live agent child plus its ACP handshake result and running client
/// endpoint. Only one prompt may be in flight at a time (§4.D.8).
pub struct AgentSupervisor {
    child: Arc<Mutex<AgentProcess>>,
    endpoint: ClientEndpoint,
    terminals: TerminalManager,
    state: Arc<LifecycleState>,
    pub protocol_version: Option<String>,
    pub agent_capabilities: BTreeMap<String, Value>,
}

impl AgentSupervisor {
    /// Spawn the agent child, run the `initialize`/`authenticate`
    /// handshake, and start the client endpoint. Returns the supervisor
    /// plus a channel of every JSON-RPC frame observed on the wire in
    /// either direction — the owner drains this per turn (§4.B, §4.E).
    pub async fn spawn(
        config: SupervisorConfig,
        handler: Box<dyn ClientHandler>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Value>)> {
        let command_config = AgentCommandConfig {
            agent_command: config.agent_command.clone(),
            cwd: config.cwd.clone(),
            auth: config.auth.clone(),
        };
        let mut command = build_command(&command_config)?;

        let mut child = command
            .spawn()
            .map_err(|e| AcpError::runtime(Origin::Acp, format!("failed to spawn agent: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AcpError::runtime(Origin::Acp, "agent child has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AcpError::runtime(Origin::Acp, "agent child has no stdout"))?;

        let pid = child.id();
        let started_at = Utc::now();

        let mut transport = Transport::from_child_stdio(stdin, stdout);
        let init_response = initialize(&mut transport).await?;

        let auth_methods: Vec<String> = init_response
            .auth_methods
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        authenticate_if_needed(
            &mut transport,
            &auth_methods,
            &config.auth,
            config.no_credential_policy,
        )
        .await?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reader, writer) = transport.into_split();
        let terminals = TerminalManager::default();
        let serializer = SessionUpdateSerializer::new();

        let endpoint = ClientEndpoint::spawn(
            reader,
            writer,
            config.cwd,
            config.permission_mode,
            terminals.clone(),
            handler,
            serializer,
            event_tx,
        );

        let state = Arc::new(LifecycleState {
            lifecycle: Mutex::new(AgentLifecycle {
                pid,
                started_at,
                running: true,
                last_exit: None,
            }),
            shutting_down: AtomicBool::new(false),
            active_prompt: AtomicBool::new(false),
        });

        let child_handle = Arc::new(Mutex::new(AgentProcess::new(child)));
        spawn_exit_watcher(child_handle.clone(), state.clone());

        let agent_capabilities = serde_json::to_value(&init_response.agent_capabilities)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .map(|m| m.into_iter().collect())
            .unwrap_or_default();

        Ok((
            Self {
                child: child_handle,
                endpoint,
                terminals,
                state,
                protocol_version: Some(init_response.protocol_version.to_string()),
                agent_capabilities,
            },
            event_rx,
        ))
    }

    pub async fn lifecycle(&self) -> AgentLifecycle {
        self.state.lifecycle.lock().await.clone()
    }

    pub async fn create_session(&self, cwd: &std::path::Path) -> Result<String> {
        let id = next_request_id();
        let params = json!({"cwd": cwd});
        let result = self.endpoint.call(id, "newSession", params).await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AcpError::runtime(Origin::Acp, "newSession response missing sessionId"))
    }

    /// Per §4.E: `loadSession` only completes, from the caller's view,
    /// once the burst of historical `sessionUpdate` replays it triggers
    /// has quiesced. The replay itself is suppressed from the serializer's
    /// user-visible callback for the whole call, including the drain.
    pub async fn load_session(&self, session_id: &str, cwd: &std::path::Path) -> Result<()> {
        let id = next_request_id();
        let params = json!({"sessionId": session_id, "cwd": cwd});

        self.endpoint.set_replay_suppressed(true);
        let call_result = self.endpoint.call(id, "loadSession", params).await;
        let drain_result = if call_result.is_ok() {
            self.endpoint.drain_replay(REPLAY_IDLE_MS, REPLAY_TIMEOUT_MS).await
        } else {
            Ok(())
        };
        self.endpoint.set_replay_suppressed(false);

        call_result?;
        drain_result
    }

    /// Issue `prompt`; only one may be outstanding at a time (§4.D.8).
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<Value> {
        if self.state.active_prompt.swap(true, Ordering::SeqCst) {
            return Err(AcpError::runtime(Origin::Acp, "a prompt is already in flight for this supervisor"));
        }

        let id = next_request_id();
        let params = json!({"sessionId": session_id, "prompt": text});
        let result = self.endpoint.call(id, "prompt", params).await;
        self.state.active_prompt.store(false, Ordering::SeqCst);
        result
    }

    pub async fn close(&self) {
        self.state.shutting_down.store(true, Ordering::SeqCst);
        self.terminals.shutdown().await;
        let mut guard = self.child.lock().await;
        if guard.is_running() {
            let _ = guard.inner_mut().start_kill();
        }
    }
}

#[async_trait]
impl ActiveSessionController for AgentSupervisor {
    async fn has_active_prompt(&self) -> bool {
        self.state.active_prompt.load(Ordering::SeqCst)
    }

    async fn request_cancel_active_prompt(&self) -> bool {
        if !self.has_active_prompt().await {
            return true;
        }
        self.endpoint.set_cancelling(true);
        let envelope = json!({"jsonrpc": "2.0", "method": "cancel", "params": {}});
        // Fire-and-forget: the eventual `prompt` response carries the
        // `cancelled` stop reason (§4.C precedence rule), so we don't wait
        // for a dedicated response here.
        let sent = self.endpoint.notify(envelope).await;
        sent.is_ok()
    }

    async fn set_session_mode(&self, mode_id: &str) -> acpx_core::traits::Result<ControlOutcome> {
        let id = next_request_id();
        let params = json!({"modeId": mode_id});
        self.endpoint
            .call(id, "setSessionMode", params)
            .await
            .map(|detail| ControlOutcome { applied: true, detail: Some(detail) })
            .map_err(|e| ControlError::new(e.message))
    }

    async fn set_session_config_option(&self, config_id: &str, value: Value) -> acpx_core::traits::Result<ControlOutcome> {
        let id = next_request_id();
        let params = json!({"configId": config_id, "value": value});
        self.endpoint
            .call(id, "setSessionConfigOption", params)
            .await
            .map(|detail| ControlOutcome { applied: true, detail: Some(detail) })
            .map_err(|e| ControlError::new(e.message))
    }
}

fn spawn_exit_watcher(child: Arc<Mutex<AgentProcess>>, state: Arc<LifecycleState>) {
    tokio::spawn(async move {
        let status = {
            let mut guard = child.lock().await;
            guard.inner_mut().wait().await
        };

        let unexpected = state.active_prompt.load(Ordering::SeqCst) && !state.shutting_down.load(Ordering::SeqCst);

        let exit = match status {
            Ok(status) => LastExit {
                code: status.code(),
                #[cfg(unix)]
                signal: {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal().map(|s| s.to_string())
                },
                #[cfg(not(unix))]
                signal: None,
                at: Some(Utc::now()),
                reason: Some(acpx_protocol::ExitReason::ProcessExit),
                unexpected_during_prompt: unexpected,
            },
            Err(_) => LastExit {
                at: Some(Utc::now()),
                reason: Some(acpx_protocol::ExitReason::ProcessClose),
                unexpected_during_prompt: unexpected,
                ..Default::default()
            },
        };

        let mut lifecycle = state.lifecycle.lock().await;
        lifecycle.running = false;
        lifecycle.last_exit = Some(exit);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_exit_defaults_are_empty() {
        let exit = LastExit::default();
        assert_eq!(exit.code, None);
        assert!(!exit.unexpected_during_prompt);
    }
}
