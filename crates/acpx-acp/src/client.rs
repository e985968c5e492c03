//! The client-side JSON-RPC endpoint (§4.D.4, §6): a single reader task
//! demultiplexes frames arriving on the agent's stdout into responses for
//! our own outgoing requests and agent-initiated callbacks (`fs/*`,
//! `terminal/*`, `session/request_permission`, `session/update`).
//!
//! Every frame that crosses the wire in either direction — request,
//! notification, or response — is also forwarded verbatim to an
//! `event_sink`, so the owner (§4.B, §4.H) can stream it to a connected
//! submitter and append it to the session's event log.

use crate::error::{AcpError, Origin, Result};
use crate::fs_guard::ensure_within_cwd;
use crate::serializer::SessionUpdateSerializer;
use crate::terminal::TerminalManager;
use crate::transport::{TransportReader, TransportWriter};
use acpx_core::PermissionMode;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

/// One option offered by an agent's `session/request_permission` call.
/// The concrete ACP schema is adapter-defined; acpx only needs the id and
/// a coarse allow/reject classification to apply `PermissionMode`.
#[derive(Debug, Clone)]
pub struct PermissionOption {
    pub option_id: String,
    pub kind: String,
}

impl PermissionOption {
    fn is_allow(&self) -> bool {
        self.kind.to_lowercase().contains("allow")
    }

    fn is_reject(&self) -> bool {
        self.kind.to_lowercase().contains("reject") || self.kind.to_lowercase().contains("deny")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Selected(String),
    Cancelled,
}

/// The first 16 lines / 1200 chars of a pending write, per §6.
#[derive(Debug, Clone)]
pub struct WritePreview {
    pub text: String,
    pub truncated: bool,
}

impl WritePreview {
    pub fn build(content: &str) -> Self {
        const MAX_LINES: usize = 16;
        const MAX_CHARS: usize = 1200;

        let mut lines: Vec<&str> = content.lines().collect();
        let line_truncated = lines.len() > MAX_LINES;
        lines.truncate(MAX_LINES);
        let mut text = lines.join("\n");

        let char_truncated = text.chars().count() > MAX_CHARS;
        if char_truncated {
            text = text.chars().take(MAX_CHARS).collect();
        }

        Self {
            text,
            truncated: line_truncated || char_truncated,
        }
    }

    pub fn rendered(&self) -> String {
        if self.truncated {
            format!("{}…", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// Policy seam for the decisions §6 explicitly leaves to "a confirmation
/// callback" — acpx's core only defines this contract; the CLI front-end
/// (out of core scope) is free to back it with a prompt, and the owner
/// process (headless) backs it with [`NonInteractiveHandler`].
#[async_trait]
pub trait ClientHandler: Send + Sync {
    async fn confirm_write(&self, path: &std::path::Path, preview: &WritePreview) -> bool;
    async fn decide_permission(&self, options: &[PermissionOption]) -> PermissionDecision;
}

/// Headless default: resolves writes and permission requests from a
/// preconfigured map of `{permissionId: value}` rather than prompting a
/// human, since the queue owner has no attached terminal (§4.B).
pub struct NonInteractiveHandler {
    pub non_interactive_permissions: std::collections::BTreeMap<String, Value>,
}

#[async_trait]
impl ClientHandler for NonInteractiveHandler {
    async fn confirm_write(&self, _path: &std::path::Path, _preview: &WritePreview) -> bool {
        // No policy entry means no human to ask and no default carve-out:
        // the safe behavior is to deny the write.
        self.non_interactive_permissions
            .get("fs/write_text_file")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    async fn decide_permission(&self, options: &[PermissionOption]) -> PermissionDecision {
        if let Some(configured) = self
            .non_interactive_permissions
            .get("session/request_permission")
            .and_then(Value::as_str)
        {
            if options.iter().any(|o| o.option_id == configured) {
                return PermissionDecision::Selected(configured.to_string());
            }
        }

        if let Some(option) = options.iter().find(|o| o.is_allow()) {
            return PermissionDecision::Selected(option.option_id.clone());
        }
        PermissionDecision::Cancelled
    }
}

struct Shared {
    cwd: PathBuf,
    permission_mode: PermissionMode,
    cancel_in_progress: AtomicBool,
    terminals: TerminalManager,
    handler: Box<dyn ClientHandler>,
    serializer: SessionUpdateSerializer,
    pending: DashMap<u64, oneshot::Sender<Value>>,
    writer: Mutex<TransportWriter>,
    event_sink: mpsc::UnboundedSender<Value>,
}

/// Handle to the running demux loop. Cloning shares the same underlying
/// state; only one reader task ever runs per endpoint.
#[derive(Clone)]
pub struct ClientEndpoint {
    shared: Arc<Shared>,
}

impl ClientEndpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        mut reader: TransportReader,
        writer: TransportWriter,
        cwd: PathBuf,
        permission_mode: PermissionMode,
        terminals: TerminalManager,
        handler: Box<dyn ClientHandler>,
        serializer: SessionUpdateSerializer,
        event_sink: mpsc::UnboundedSender<Value>,
    ) -> Self {
        let shared = Arc::new(Shared {
            cwd,
            permission_mode,
            cancel_in_progress: AtomicBool::new(false),
            terminals,
            handler,
            serializer,
            pending: DashMap::new(),
            writer: Mutex::new(writer),
            event_sink,
        });

        let endpoint = Self { shared };
        let loop_endpoint = endpoint.clone();
        tokio::spawn(async move {
            loop {
                match reader.read_value().await {
                    Ok(frame) => loop_endpoint.on_frame(frame).await,
                    Err(_) => {
                        // Pipe closed or malformed input; every still-pending
                        // outgoing call must be unblocked rather than hang.
                        loop_endpoint.fail_all_pending("agent connection closed");
                        break;
                    }
                }
            }
        });

        endpoint
    }

    pub fn set_cancelling(&self, cancelling: bool) {
        self.shared.cancel_in_progress.store(cancelling, Ordering::SeqCst);
    }

    /// Send an outgoing JSON-RPC request and await its matched response,
    /// logging both directions to `event_sink`.
    pub async fn call(&self, id: u64, method: &str, params: Value) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        let envelope = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let _ = self.shared.event_sink.send(envelope.clone());
        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = writer.write_value(&envelope).await {
                self.shared.pending.remove(&id);
                return Err(e);
            }
        }

        let response = rx
            .await
            .map_err(|_| AcpError::runtime(Origin::Acp, "agent connection closed before responding"))?;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("agent returned an error")
                .to_string();
            return Err(AcpError::from_jsonrpc_error(code, &message, Origin::Acp, error.clone()));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send a notification (no id, no response expected) — used for
    /// `cancel`, where the eventual `prompt` response carries the
    /// `cancelled` stop reason rather than a dedicated reply (§4.C).
    pub async fn notify(&self, envelope: Value) -> Result<()> {
        let _ = self.shared.event_sink.send(envelope.clone());
        let mut writer = self.shared.writer.lock().await;
        writer.write_value(&envelope).await
    }

    /// Suppress (or re-enable) forwarding `session/update` notifications to
    /// the caller-visible serializer callback, for the duration of a
    /// `loadSession` replay (§4.E).
    pub fn set_replay_suppressed(&self, suppressed: bool) {
        self.shared.serializer.set_suppressed(suppressed);
    }

    /// Block until the serializer's observed/processed counters agree and
    /// have held still for `idle_ms`, or fail after `max(idle_ms, timeout_ms)`
    /// (§4.E replay-drain barrier).
    pub async fn drain_replay(&self, idle_ms: u64, timeout_ms: u64) -> Result<()> {
        self.shared.serializer.drain_replay(idle_ms, timeout_ms).await
    }

    fn fail_all_pending(&self, reason: &str) {
        for entry in self.shared.pending.iter() {
            let id = *entry.key();
            if let Some((_, tx)) = self.shared.pending.remove(&id) {
                let _ = tx.send(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32000, "message": reason},
                }));
            }
        }
    }

    async fn on_frame(&self, frame: Value) {
        let _ = self.shared.event_sink.send(frame.clone());

        let has_method = frame.get("method").and_then(Value::as_str);
        let id = frame.get("id").cloned();

        match (has_method, id) {
            (Some(method), Some(id)) => self.dispatch_request(method.to_string(), frame, id).await,
            (Some(method), None) => self.dispatch_notification(method, &frame),
            (None, Some(id)) => self.resolve_pending(id, frame),
            (None, None) => {}
        }
    }

    fn resolve_pending(&self, id: Value, response: Value) {
        let Some(id) = id.as_u64() else { return };
        if let Some((_, tx)) = self.shared.pending.remove(&id) {
            let _ = tx.send(response);
        }
    }

    fn dispatch_notification(&self, method: &str, frame: &Value) {
        if method == "session/update" {
            let notification = frame.clone();
            self.shared.serializer.dispatch(&notification, |_n| {
                // Forwarding to the submitter already happened via
                // `event_sink` above; the serializer only orders
                // quiescence detection for the replay-drain barrier.
            });
        }
    }

    async fn dispatch_request(&self, method: String, frame: Value, id: Value) {
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        let result = self.handle_callback(&method, params).await;

        let envelope = match result {
            Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
            Err(err) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32000, "message": err.message, "data": err.detail_code},
            }),
        };

        let _ = self.shared.event_sink.send(envelope.clone());
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.write_value(&envelope).await;
    }

    async fn handle_callback(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "fs/read_text_file" => self.read_text_file(params).await,
            "fs/write_text_file" => self.write_text_file(params).await,
            "session/request_permission" => self.request_permission(params).await,
            "terminal/create" => self.terminal_create(params).await,
            "terminal/output" => self.terminal_output(params).await,
            "terminal/wait_for_exit" => self.terminal_wait(params).await,
            "terminal/kill" => self.terminal_kill(params).await,
            "terminal/release" => self.terminal_release(params).await,
            other => Err(AcpError::runtime(Origin::Acp, format!("unsupported callback method: {other}"))),
        }
    }

    async fn read_text_file(&self, params: Value) -> Result<Value> {
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("fs/read_text_file missing path"))?;
        let path = ensure_within_cwd(std::path::Path::new(path), &self.shared.cwd)?;

        if self.shared.permission_mode == PermissionMode::DenyAll {
            return Err(AcpError::permission_denied("reads are denied in deny-all permission mode")
                .with_detail("PERMISSION_PROMPT_UNAVAILABLE"));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let line = params.get("line").and_then(Value::as_u64).map(|l| l as usize);
        let limit = params.get("limit").and_then(Value::as_u64).map(|l| l as usize);

        let sliced = match (line, limit) {
            (Some(start), Some(limit)) => content
                .lines()
                .skip(start.saturating_sub(1))
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
            (Some(start), None) => content.lines().skip(start.saturating_sub(1)).collect::<Vec<_>>().join("\n"),
            (None, Some(limit)) => content.lines().take(limit).collect::<Vec<_>>().join("\n"),
            (None, None) => content,
        };

        Ok(json!({"content": sliced}))
    }

    async fn write_text_file(&self, params: Value) -> Result<Value> {
        let path_str = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("fs/write_text_file missing path"))?;
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("fs/write_text_file missing content"))?;
        let path = ensure_within_cwd(std::path::Path::new(path_str), &self.shared.cwd)?;

        let approved = match self.shared.permission_mode {
            PermissionMode::ApproveAll => true,
            PermissionMode::DenyAll => false,
            PermissionMode::Confirm => {
                let preview = WritePreview::build(content);
                self.shared.handler.confirm_write(&path, &preview).await
            }
        };

        if !approved {
            return Err(AcpError::permission_denied(format!("write to {} was denied", path.display())));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        Ok(json!({}))
    }

    async fn request_permission(&self, params: Value) -> Result<Value> {
        if self.shared.cancel_in_progress.load(Ordering::SeqCst) {
            return Ok(json!({"outcome": "cancelled"}));
        }

        let options: Vec<PermissionOption> = params
            .get("options")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|o| {
                        let option_id = o.get("optionId").and_then(Value::as_str)?.to_string();
                        let kind = o.get("kind").and_then(Value::as_str).unwrap_or("").to_string();
                        Some(PermissionOption { option_id, kind })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let decision = match self.shared.permission_mode {
            PermissionMode::ApproveAll => options
                .iter()
                .find(|o| o.is_allow())
                .map(|o| PermissionDecision::Selected(o.option_id.clone()))
                .unwrap_or(PermissionDecision::Cancelled),
            PermissionMode::DenyAll => options
                .iter()
                .find(|o| o.is_reject())
                .map(|o| PermissionDecision::Selected(o.option_id.clone()))
                .unwrap_or(PermissionDecision::Cancelled),
            PermissionMode::Confirm => self.shared.handler.decide_permission(&options).await,
        };

        Ok(match decision {
            PermissionDecision::Selected(option_id) => json!({"outcome": "selected", "optionId": option_id}),
            PermissionDecision::Cancelled => json!({"outcome": "cancelled"}),
        })
    }

    async fn terminal_create(&self, params: Value) -> Result<Value> {
        let command = params
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("terminal/create missing command"))?;
        let args: Vec<String> = params
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let env: Vec<(String, String)> = params
            .get("env")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| {
                        let name = e.get("name").and_then(Value::as_str)?.to_string();
                        let value = e.get("value").and_then(Value::as_str)?.to_string();
                        Some((name, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let handle = self
            .shared
            .terminals
            .create(command, &args, &self.shared.cwd, &env)
            .await?;

        Ok(json!({"terminalId": handle.id()}))
    }

    fn terminal_handle(&self, params: &Value) -> Result<crate::terminal::TerminalHandle> {
        let id = params
            .get("terminalId")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("missing terminalId"))?;
        self.shared
            .terminals
            .get(id)
            .ok_or_else(|| AcpError::runtime(Origin::Acp, format!("unknown terminal {id}")))
    }

    async fn terminal_output(&self, params: Value) -> Result<Value> {
        let handle = self.terminal_handle(&params)?;
        let (output, truncated) = handle.output().await;
        let exit = handle.exit_status().await;
        Ok(json!({
            "output": output,
            "truncated": truncated,
            "exitStatus": exit.map(|e| json!({"exitCode": e.exit_code, "signal": e.signal})),
        }))
    }

    async fn terminal_wait(&self, params: Value) -> Result<Value> {
        let handle = self.terminal_handle(&params)?;
        let status = handle.wait_for_exit().await;
        Ok(json!({"exitCode": status.exit_code, "signal": status.signal}))
    }

    async fn terminal_kill(&self, params: Value) -> Result<Value> {
        let handle = self.terminal_handle(&params)?;
        handle.kill().await?;
        Ok(json!({}))
    }

    async fn terminal_release(&self, params: Value) -> Result<Value> {
        let id = params
            .get("terminalId")
            .and_then(Value::as_str)
            .ok_or_else(|| AcpError::usage("missing terminalId"))?;
        self.shared.terminals.release(id).await?;
        Ok(json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_preview_truncates_long_content_with_ellipsis() {
        let content = (0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let preview = WritePreview::build(&content);
        assert!(preview.truncated);
        assert_eq!(preview.text.lines().count(), 16);
        assert!(preview.rendered().ends_with('…'));
    }

    #[test]
    fn write_preview_leaves_short_content_untouched() {
        let preview = WritePreview::build("line 1\nline 2");
        assert!(!preview.truncated);
        assert_eq!(preview.rendered(), "line 1\nline 2");
    }

    #[test]
    fn permission_option_classifies_allow_and_reject() {
        let allow = PermissionOption {
            option_id: "a".into(),
            kind: "allow_once".into(),
        };
        let reject = PermissionOption {
            option_id: "b".into(),
            kind: "reject_always".into(),
        };
        assert!(allow.is_allow());
        assert!(reject.is_reject());
    }

    #[tokio::test]
    async fn non_interactive_handler_denies_writes_by_default() {
        let handler = NonInteractiveHandler {
            non_interactive_permissions: Default::default(),
        };
        let preview = WritePreview::build("x");
        assert!(!handler.confirm_write(std::path::Path::new("/tmp/x"), &preview).await);
    }

    struct AllowAll;

    #[async_trait]
    impl ClientHandler for AllowAll {
        async fn confirm_write(&self, _path: &std::path::Path, _preview: &WritePreview) -> bool {
            true
        }

        async fn decide_permission(&self, _options: &[PermissionOption]) -> PermissionDecision {
            PermissionDecision::Cancelled
        }
    }

    #[tokio::test]
    async fn replay_suppression_hides_updates_until_drain_completes() {
        use crate::transport::Transport;
        use tokio::io::{duplex, split, BufReader};

        let (client_side, agent_side) = duplex(1 << 16);
        let (client_read, client_write) = split(client_side);
        let (agent_read, agent_write) = split(agent_side);

        let client_transport =
            Transport::from_boxed(Box::pin(client_write), Box::pin(BufReader::new(client_read)));
        let mut agent_transport =
            Transport::from_boxed(Box::pin(agent_write), Box::pin(BufReader::new(agent_read)));

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (reader, writer) = client_transport.into_split();
        let endpoint = ClientEndpoint::spawn(
            reader,
            writer,
            PathBuf::from("/proj"),
            PermissionMode::ApproveAll,
            TerminalManager::default(),
            Box::new(AllowAll),
            SessionUpdateSerializer::new(),
            event_tx,
        );
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        // The fake agent fires a burst of replay notifications, then
        // answers the pending `loadSession` call.
        let agent_task = tokio::spawn(async move {
            for i in 0..20u32 {
                agent_transport
                    .write_value(&json!({"jsonrpc": "2.0", "method": "session/update", "params": {"n": i}}))
                    .await
                    .unwrap();
            }
            let request = agent_transport.read_value().await.unwrap();
            let id = request["id"].clone();
            agent_transport
                .write_value(&json!({"jsonrpc": "2.0", "id": id, "result": {}}))
                .await
                .unwrap();
        });

        endpoint.set_replay_suppressed(true);
        let id = crate::transport::next_request_id();
        endpoint.call(id, "loadSession", json!({})).await.unwrap();
        endpoint.drain_replay(50, 2000).await.unwrap();
        endpoint.set_replay_suppressed(false);

        agent_task.await.unwrap();
    }

    #[tokio::test]
    async fn non_interactive_handler_picks_first_allow_option() {
        let handler = NonInteractiveHandler {
            non_interactive_permissions: Default::default(),
        };
        let options = vec![
            PermissionOption { option_id: "reject".into(), kind: "reject_once".into() },
            PermissionOption { option_id: "allow".into(), kind: "allow_once".into() },
        ];
        assert_eq!(
            handler.decide_permission(&options).await,
            PermissionDecision::Selected("allow".into())
        );
    }
}
