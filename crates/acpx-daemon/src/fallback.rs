//! Fallback control path (§4.C step 4): when no active supervisor is
//! attached to the turn controller, `set_mode` / `set_config_option` are
//! served by reconnecting a short-lived ACP client just long enough to
//! load the session and issue the one RPC, then tearing it down.
//!
//! This never touches the event log or the turn state machine — it is a
//! narrow escape hatch for control requests that arrive while the owner
//! has no live agent child (e.g. the previous turn's child exited and a
//! new one has not been spawned yet).

use acpx_acp::{
    AgentSupervisor, ClientHandler, NoCredentialPolicy, NonInteractiveHandler, PermissionDecision,
    SupervisorConfig, WritePreview,
};
use acpx_core::{ActiveSessionController, PermissionMode};
use acpx_protocol::record::SessionRecord;
use acpx_protocol::{AcpxError, Origin};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A fallback reconnect never serves a prompt turn, so any callback it
/// receives (a write, a permission request) is refused outright rather
/// than silently approved.
struct RefuseEverything;

#[async_trait]
impl ClientHandler for RefuseEverything {
    async fn confirm_write(&self, _path: &Path, _preview: &WritePreview) -> bool {
        false
    }

    async fn decide_permission(&self, _options: &[acpx_acp::client::PermissionOption]) -> PermissionDecision {
        PermissionDecision::Cancelled
    }
}

const DEFAULT_TIMEOUT_MS: u64 = 10_000;

async fn reconnect(
    agent_command: &str,
    auth: &BTreeMap<String, String>,
    record: &SessionRecord,
) -> Result<AgentSupervisor, AcpxError> {
    let config = SupervisorConfig {
        agent_command: agent_command.to_string(),
        cwd: Path::new(&record.cwd).to_path_buf(),
        auth: auth.clone(),
        no_credential_policy: NoCredentialPolicy::Skip,
        permission_mode: PermissionMode::DenyAll,
        non_interactive_permissions: BTreeMap::new(),
    };

    let handler: Box<dyn ClientHandler> = if config.permission_mode == PermissionMode::DenyAll {
        Box::new(RefuseEverything)
    } else {
        Box::new(NonInteractiveHandler { non_interactive_permissions: BTreeMap::new() })
    };

    let (supervisor, _events) = AgentSupervisor::spawn(config, handler).await?;
    supervisor
        .load_session(&record.acp_session_id, Path::new(&record.cwd))
        .await?;
    Ok(supervisor)
}

async fn with_fallback<F, Fut, T>(timeout_ms: Option<u64>, body: F) -> Result<T, AcpxError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, AcpxError>>,
{
    let ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    match tokio::time::timeout(Duration::from_millis(ms), body()).await {
        Ok(result) => result,
        Err(_) => Err(AcpxError::timeout(Origin::Queue, "control request fallback timed out")
            .with_detail("QUEUE_CONTROL_REQUEST_FAILED")),
    }
}

/// Reconnect, load the session, and issue `setSessionMode`, bounded by
/// `timeout_ms` end to end (connect + load + call).
pub async fn run_set_mode(
    home: &Path,
    agent_command: &str,
    auth: &BTreeMap<String, String>,
    record: &SessionRecord,
    mode_id: &str,
    timeout_ms: Option<u64>,
) -> Result<bool, AcpxError> {
    let _ = home; // reserved: fallback does not touch the record store
    with_fallback(timeout_ms, || async {
        let supervisor = reconnect(agent_command, auth, record).await?;
        let outcome = supervisor
            .set_session_mode(mode_id)
            .await
            .map_err(AcpxError::from)?;
        supervisor.close().await;
        Ok(outcome.applied)
    })
    .await
}

/// Reconnect, load the session, and issue `setSessionConfigOption`,
/// bounded by `timeout_ms` end to end.
pub async fn run_set_config_option(
    home: &Path,
    agent_command: &str,
    auth: &BTreeMap<String, String>,
    record: &SessionRecord,
    config_id: &str,
    value: Value,
    timeout_ms: Option<u64>,
) -> Result<bool, AcpxError> {
    let _ = home;
    with_fallback(timeout_ms, || async {
        let supervisor = reconnect(agent_command, auth, record).await?;
        let outcome = supervisor
            .set_session_config_option(config_id, value)
            .await
            .map_err(AcpxError::from)?;
        supervisor.close().await;
        Ok(outcome.applied)
    })
    .await
}
