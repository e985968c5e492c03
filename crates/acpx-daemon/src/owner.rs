//! Owner bootstrap (§4.A / §5 / §6): acquire the session lease, spawn and
//! handshake the agent child, bind the IPC server, and drive the turn
//! controller until idle TTL or a shutdown signal retires it.
//!
//! This is the entry point a detached owner process runs (the payload
//! arrives via `ACPX_QUEUE_OWNER_PAYLOAD`, §6) — it has no CLI-parsing
//! dependency of its own.

use crate::controller::{ShutdownReason, Task, TurnController};
use crate::server;
use crate::store;
use acpx_acp::{AgentSupervisor, ClientHandler, NoCredentialPolicy, NonInteractiveHandler, SupervisorConfig};
use acpx_core::ActiveSessionController;
use acpx_protocol::queue::QueueOwnerPayload;
use acpx_protocol::record::SessionRecord;
use acpx_protocol::{AcpxError, ExitCode, Origin};
use acpx_rpc::{bind_unix_listener, release, try_acquire_lease};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period SIGINT/SIGTERM gives an in-flight prompt to return the
/// `cancelled` stop reason before the owner force-kills the child (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_millis(2_500);

/// Run the owner end to end, returning the exit code the caller's process
/// should terminate with.
pub async fn run(home: PathBuf, payload: QueueOwnerPayload) -> ExitCode {
    match run_inner(home, payload).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            warn!("queue owner exiting: {}", e.message);
            e.exit_code()
        }
    }
}

async fn run_inner(home: PathBuf, payload: QueueOwnerPayload) -> Result<(), AcpxError> {
    let pid = std::process::id();
    let lease = match try_acquire_lease(&home, &payload.session_id, pid)
        .map_err(|e| AcpxError::runtime(Origin::Runtime, e.to_string()))?
    {
        Some(lease) => lease,
        None => {
            // Lost the race to become owner (§4.A never retries inside the
            // call) — the process that spawned us will reconnect to
            // whoever won instead.
            info!(session_id = %payload.session_id, "lease already held, exiting");
            return Ok(());
        }
    };

    let mut record = store::read_record_by_id(&home, &payload.session_id).ok_or_else(|| {
        AcpxError::no_session(Origin::Runtime, format!("no session record for {}", payload.session_id))
    })?;

    let (supervisor, events, acp_session_id) = spawn_supervisor(&payload, &record).await.map_err(|e| {
        let _ = release(&lease);
        e
    })?;
    let supervisor = Arc::new(supervisor);

    if record.acp_session_id != acp_session_id {
        // `loadSession` failed and we fell back to `newSession` (§7
        // recovery policy (a)); persist the fresh id immediately so a
        // crash before the first turn completes still resumes correctly.
        record.acp_session_id = acp_session_id;
        let _ = store::write_record(&home, &record);
    }

    let controller = Arc::new(TurnController::new(
        home.clone(),
        record,
        payload.agent_command.clone(),
        payload.auth.clone(),
        None,
    ));
    controller.attach_supervisor(supervisor.clone(), events).await;

    let listener = bind_unix_listener(&lease.socket_path)
        .map_err(|e| AcpxError::runtime(Origin::Runtime, format!("failed to bind owner socket: {e}")))?;

    let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
    let shutdown = CancellationToken::new();

    let accept_handle = tokio::spawn(server::accept_loop(listener, task_tx, shutdown.clone()));
    let signal_handle = tokio::spawn(watch_for_shutdown_signal(
        controller.clone(),
        supervisor.clone(),
        shutdown.clone(),
    ));

    let ttl = Duration::from_millis(payload.ttl_ms);
    match controller.run(task_rx, ttl).await {
        ShutdownReason::IdleTimeout => info!(session_id = %payload.session_id, "idle TTL elapsed, closing"),
        ShutdownReason::Closed => info!(session_id = %payload.session_id, "task channel closed"),
    }

    controller.begin_closing().await;
    shutdown.cancel();
    accept_handle.abort();
    signal_handle.abort();

    supervisor.close().await;
    let _ = release(&lease);
    Ok(())
}

/// Spawn the agent child and resume the session, falling back to
/// `newSession` when `loadSession` fails with a fallback-eligible error
/// (§7: local recovery policy (a)).
async fn spawn_supervisor(
    payload: &QueueOwnerPayload,
    record: &SessionRecord,
) -> Result<(AgentSupervisor, mpsc::UnboundedReceiver<Value>, String), AcpxError> {
    let config = SupervisorConfig {
        agent_command: payload.agent_command.clone(),
        cwd: Path::new(&record.cwd).to_path_buf(),
        auth: payload.auth.clone(),
        no_credential_policy: NoCredentialPolicy::Skip,
        permission_mode: payload.permission_mode,
        non_interactive_permissions: BTreeMap::new(),
    };

    // The owner is headless: `Confirm` mode has no terminal to prompt, so
    // it resolves through the same policy-driven handler the fallback
    // reconnect path uses, failing closed when no policy entry matches.
    let handler: Box<dyn ClientHandler> =
        Box::new(NonInteractiveHandler { non_interactive_permissions: BTreeMap::new() });

    let (supervisor, events) = AgentSupervisor::spawn(config, handler).await?;

    let acp_session_id = match supervisor.load_session(&record.acp_session_id, Path::new(&record.cwd)).await {
        Ok(()) => record.acp_session_id.clone(),
        Err(e) if e.is_fallback_eligible_load_error() => {
            supervisor.create_session(Path::new(&record.cwd)).await?
        }
        Err(e) => return Err(e),
    };

    Ok((supervisor, events, acp_session_id))
}

#[cfg(unix)]
async fn watch_for_shutdown_signal(
    controller: Arc<TurnController>,
    supervisor: Arc<AgentSupervisor>,
    shutdown: CancellationToken,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return,
    };

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }

    info!("received shutdown signal, entering closing state");
    controller.begin_closing().await;
    let _ = supervisor.request_cancel_active_prompt().await;

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    supervisor.close().await;
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn watch_for_shutdown_signal(_: Arc<TurnController>, _: Arc<AgentSupervisor>, _: CancellationToken) {
    std::future::pending::<()>().await;
}
