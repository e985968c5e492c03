//! NDJSON JSON-RPC framing over the agent child's stdio (§4.D.2, §4.D.4, §6).

use crate::error::{AcpError, Origin, Result};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::Duration;

/// Type-erased async writer, so tests can swap in an in-memory duplex
/// stream instead of real child stdio.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send + Sync + Unpin>>;
/// Type-erased async buffered reader, counterpart to [`BoxedWriter`].
pub type BoxedReader = Pin<Box<dyn AsyncBufRead + Send + Sync + Unpin>>;

/// Handle to the spawned agent child. Liveness is observed lazily via
/// `try_wait`, not assumed from the handle's mere existence.
pub struct AgentProcess {
    child: Child,
}

impl AgentProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Non-blocking liveness probe.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn inner_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

/// One line-framed JSON-RPC channel to the agent: either real child stdio,
/// or a boxed in-process transport used by tests.
pub struct Transport {
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    boxed_writer: Option<BoxedWriter>,
    boxed_reader: Option<BoxedReader>,
    /// Minimum duration to wait on a single `read_line` before treating it
    /// as a timeout; the agent may pause for long tool calls.
    pub per_read_timeout: Duration,
}

impl Transport {
    pub fn from_child_stdio(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
            boxed_writer: None,
            boxed_reader: None,
            per_read_timeout: Duration::from_secs(300),
        }
    }

    pub fn from_boxed(writer: BoxedWriter, reader: BoxedReader) -> Self {
        Self {
            stdin: None,
            stdout: None,
            boxed_writer: Some(writer),
            boxed_reader: Some(reader),
            per_read_timeout: Duration::from_secs(300),
        }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        if let Some(writer) = &mut self.boxed_writer {
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("write to agent failed: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("flush agent stdin failed: {e}")))?;
        } else if let Some(stdin) = &mut self.stdin {
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("write to agent failed: {e}")))?;
            stdin
                .flush()
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("flush agent stdin failed: {e}")))?;
        } else {
            return Err(AcpError::runtime(Origin::Acp, "agent transport has no writer"));
        }

        Ok(())
    }

    /// Read exactly one NDJSON line, with `per_read_timeout` applied.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();

        let read = if let Some(reader) = &mut self.boxed_reader {
            tokio::time::timeout(self.per_read_timeout, reader.read_line(&mut line)).await
        } else if let Some(stdout) = &mut self.stdout {
            tokio::time::timeout(self.per_read_timeout, stdout.read_line(&mut line)).await
        } else {
            return Err(AcpError::runtime(Origin::Acp, "agent transport has no reader"));
        };

        match read {
            Err(_) => Err(AcpError::timeout(Origin::Acp, "agent read timed out")),
            Ok(Ok(0)) => Err(AcpError::runtime(Origin::Acp, "agent closed the connection").with_detail("AGENT_PIPE_CLOSED")),
            Ok(Ok(_)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(AcpError::runtime(Origin::Acp, format!("read from agent failed: {e}"))),
        }
    }

    pub async fn read_value(&mut self) -> Result<Value> {
        let line = self.read_line().await?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Split into independent read/write halves so a background reader
    /// task can demultiplex incoming frames while the writer half is
    /// shared (behind a mutex) between outgoing RPC calls and callback
    /// responses (§4.D, §9 "coroutine-style flows").
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        (
            TransportReader {
                stdout: self.stdout,
                boxed_reader: self.boxed_reader,
                per_read_timeout: self.per_read_timeout,
            },
            TransportWriter {
                stdin: self.stdin,
                boxed_writer: self.boxed_writer,
            },
        )
    }
}

pub struct TransportReader {
    stdout: Option<BufReader<ChildStdout>>,
    boxed_reader: Option<BoxedReader>,
    per_read_timeout: Duration,
}

impl TransportReader {
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();

        let read = if let Some(reader) = &mut self.boxed_reader {
            tokio::time::timeout(self.per_read_timeout, reader.read_line(&mut line)).await
        } else if let Some(stdout) = &mut self.stdout {
            tokio::time::timeout(self.per_read_timeout, stdout.read_line(&mut line)).await
        } else {
            return Err(AcpError::runtime(Origin::Acp, "agent transport has no reader"));
        };

        match read {
            Err(_) => Err(AcpError::timeout(Origin::Acp, "agent read timed out")),
            Ok(Ok(0)) => Err(AcpError::runtime(Origin::Acp, "agent closed the connection").with_detail("AGENT_PIPE_CLOSED")),
            Ok(Ok(_)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(AcpError::runtime(Origin::Acp, format!("read from agent failed: {e}"))),
        }
    }

    pub async fn read_value(&mut self) -> Result<Value> {
        let line = self.read_line().await?;
        Ok(serde_json::from_str(&line)?)
    }
}

pub struct TransportWriter {
    stdin: Option<ChildStdin>,
    boxed_writer: Option<BoxedWriter>,
}

impl TransportWriter {
    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');

        if let Some(writer) = &mut self.boxed_writer {
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("write to agent failed: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("flush agent stdin failed: {e}")))?;
        } else if let Some(stdin) = &mut self.stdin {
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("write to agent failed: {e}")))?;
            stdin
                .flush()
                .await
                .map_err(|e| AcpError::runtime(Origin::Acp, format!("flush agent stdin failed: {e}")))?;
        } else {
            return Err(AcpError::runtime(Origin::Acp, "agent transport has no writer"));
        }

        Ok(())
    }
}

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh outgoing JSON-RPC request id, unique per process.
pub fn next_request_id() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Wrap a method + params into a JSON-RPC 2.0 request envelope.
pub fn request_envelope(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};

    #[tokio::test]
    async fn write_then_read_round_trips_one_line() {
        let (client_side, agent_side) = duplex(8192);
        let (client_read, client_write) = split(client_side);
        let (agent_read, agent_write) = split(agent_side);

        let mut client = Transport::from_boxed(Box::pin(client_write), Box::pin(BufReader::new(client_read)));
        let mut agent = Transport::from_boxed(Box::pin(agent_write), Box::pin(BufReader::new(agent_read)));

        client
            .write_value(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();

        let received = agent.read_value().await.unwrap();
        assert_eq!(received["method"], "ping");
    }

    #[test]
    fn request_ids_are_monotonic() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }
}
