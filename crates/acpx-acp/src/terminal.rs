//! Terminal manager (§4.F): lifecycle for agent-requested shell commands
//! (`terminal/create`, `terminal/output`, `terminal/wait_for_exit`,
//! `terminal/kill`, `terminal/release`).

use crate::error::{AcpError, Origin, Result};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

/// Default cap on buffered terminal output before the oldest bytes are
/// evicted (§4.F: `len(outputBuffer) ≤ outputByteLimit`).
pub const DEFAULT_OUTPUT_BYTE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ExitStatus {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

struct TerminalState {
    child: Mutex<Option<Child>>,
    output: Mutex<VecDeque<u8>>,
    truncated: std::sync::atomic::AtomicBool,
    output_byte_limit: usize,
    exit: Mutex<Option<ExitStatus>>,
    waiters: Mutex<Vec<oneshot::Sender<ExitStatus>>>,
}

/// A handle returned to the caller of `terminal/create`; cheap to clone,
/// all state lives behind the shared [`TerminalState`].
#[derive(Clone)]
pub struct TerminalHandle {
    id: String,
    state: Arc<TerminalState>,
}

impl TerminalHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current buffered output, UTF-8 lossily decoded, plus whether the
    /// buffer has evicted earlier bytes.
    pub async fn output(&self) -> (String, bool) {
        let buf = self.state.output.lock().await;
        let bytes: Vec<u8> = buf.iter().copied().collect();
        let truncated = self.state.truncated.load(Ordering::SeqCst);
        (String::from_utf8_lossy(&bytes).into_owned(), truncated)
    }

    /// One-shot exit observation: `Some` once the child has exited.
    pub async fn exit_status(&self) -> Option<ExitStatus> {
        self.state.exit.lock().await.clone()
    }

    /// Resolve once the child exits, or immediately if it already has.
    pub async fn wait_for_exit(&self) -> ExitStatus {
        if let Some(status) = self.exit_status().await {
            return status;
        }

        let (tx, rx) = oneshot::channel();
        self.state.waiters.lock().await.push(tx);

        // The exit may have landed between the check above and registering
        // the waiter; re-check and fire it inline if so.
        if let Some(status) = self.exit_status().await {
            return status;
        }

        rx.await.unwrap_or_default()
    }

    pub async fn kill(&self) -> Result<()> {
        let mut guard = self.state.child.lock().await;
        if let Some(child) = guard.as_mut() {
            child
                .kill()
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("failed to kill terminal: {e}")))?;
        }
        Ok(())
    }
}

/// Owns every terminal spawned for one session (§4.F).
#[derive(Clone)]
pub struct TerminalManager {
    terminals: Arc<DashMap<String, TerminalHandle>>,
    next_id: Arc<AtomicU64>,
    output_byte_limit: usize,
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BYTE_LIMIT)
    }
}

impl TerminalManager {
    pub fn new(output_byte_limit: usize) -> Self {
        Self {
            terminals: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            output_byte_limit,
        }
    }

    /// `terminal/create`: spawn `command` with `args` in `cwd`, returning a
    /// handle keyed by a freshly allocated terminal id.
    pub async fn create(
        &self,
        command: &str,
        args: &[String],
        cwd: &std::path::Path,
        env: &[(String, String)],
    ) -> Result<TerminalHandle> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AcpError::runtime(Origin::Acp, format!("failed to spawn terminal command: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let id = format!("term-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = Arc::new(TerminalState {
            child: Mutex::new(Some(child)),
            output: Mutex::new(VecDeque::new()),
            truncated: std::sync::atomic::AtomicBool::new(false),
            output_byte_limit: self.output_byte_limit,
            exit: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        });

        if let Some(mut out) = stdout {
            let state = state.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match out.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => append_output(&state, &buf[..n]).await,
                    }
                }
            });
        }
        if let Some(mut err) = stderr {
            let state = state.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match err.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => append_output(&state, &buf[..n]).await,
                    }
                }
            });
        }

        {
            let state = state.clone();
            tokio::spawn(async move {
                // Hold `child` locked for the whole wait: `kill()` takes
                // the same lock, so the two never race over ownership of
                // the `Child`.
                let status = {
                    let mut guard = state.child.lock().await;
                    match guard.as_mut() {
                        Some(child) => child.wait().await,
                        None => return,
                    }
                };
                let exit = match status {
                    Ok(status) => ExitStatus {
                        exit_code: status.code(),
                        #[cfg(unix)]
                        signal: {
                            use std::os::unix::process::ExitStatusExt;
                            status.signal().map(|s| s.to_string())
                        },
                        #[cfg(not(unix))]
                        signal: None,
                    },
                    Err(_) => ExitStatus::default(),
                };

                *state.exit.lock().await = Some(exit.clone());
                let mut waiters = state.waiters.lock().await;
                for waiter in waiters.drain(..) {
                    let _ = waiter.send(exit.clone());
                }
            });
        }

        let handle = TerminalHandle {
            id: id.clone(),
            state,
        };
        self.terminals.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<TerminalHandle> {
        self.terminals.get(id).map(|entry| entry.clone())
    }

    /// `terminal/release`: kill if alive, drop the handle.
    pub async fn release(&self, id: &str) -> Result<()> {
        if let Some((_, handle)) = self.terminals.remove(id) {
            handle.kill().await?;
        }
        Ok(())
    }

    /// Release every terminal; called on supervisor shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.terminals.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.release(&id).await;
        }
    }
}

async fn append_output(state: &TerminalState, bytes: &[u8]) {
    let mut buf = state.output.lock().await;
    buf.extend(bytes.iter().copied());
    if buf.len() > state.output_byte_limit {
        let overflow = buf.len() - state.output_byte_limit;
        buf.drain(0..overflow);
        state.truncated.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn create_runs_command_and_captures_output() {
        let manager = TerminalManager::new(DEFAULT_OUTPUT_BYTE_LIMIT);
        let handle = manager
            .create("echo", &["hello".to_string()], &PathBuf::from("."), &[])
            .await
            .unwrap();

        let status = handle.wait_for_exit().await;
        assert_eq!(status.exit_code, Some(0));

        let (output, truncated) = handle.output().await;
        assert!(output.contains("hello"));
        assert!(!truncated);
    }

    #[tokio::test]
    async fn output_buffer_evicts_oldest_bytes_past_limit() {
        let state = Arc::new(TerminalState {
            child: Mutex::new(None),
            output: Mutex::new(VecDeque::new()),
            truncated: std::sync::atomic::AtomicBool::new(false),
            output_byte_limit: 8,
            exit: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        });

        append_output(&state, b"0123456789").await;
        let buf = state.output.lock().await;
        assert_eq!(buf.len(), 8);
        assert_eq!(buf.iter().copied().collect::<Vec<_>>(), b"23456789");
        assert!(state.truncated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn release_removes_and_is_idempotent() {
        let manager = TerminalManager::new(DEFAULT_OUTPUT_BYTE_LIMIT);
        let handle = manager
            .create("true", &[], &PathBuf::from("."), &[])
            .await
            .unwrap();
        let id = handle.id().to_string();

        manager.release(&id).await.unwrap();
        assert!(manager.get(&id).is_none());
        // Releasing an already-released id is a no-op, not an error.
        manager.release(&id).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_exit_resolves_after_exit_already_observed() {
        let manager = TerminalManager::new(DEFAULT_OUTPUT_BYTE_LIMIT);
        let handle = manager
            .create("true", &[], &PathBuf::from("."), &[])
            .await
            .unwrap();
        let _ = handle.wait_for_exit().await;
        // A second wait after exit has landed must resolve immediately
        // from the one-shot `exit` slot rather than hanging.
        let status = handle.wait_for_exit().await;
        assert_eq!(status.exit_code, Some(0));
    }
}
