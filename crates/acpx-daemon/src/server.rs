//! Queue-owner server (§4.B): accepts IPC connections on the leased
//! socket, parses one request per connection, and turns it into a
//! [`Task`] for the turn controller to dispatch. Streams the controller's
//! responses back over the same connection until a terminal frame (or,
//! for a fire-and-forget `submit_prompt`, immediately after `accepted`).

use crate::controller::{Task, TaskKind};
use acpx_protocol::queue::{QueueRequest, QueueResponse};
use acpx_rpc::{read_frame_value, write_frame, Conn};
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Accept connections until `shutdown` fires or the listener errors out.
/// Every accepted connection is handled on its own task so a slow or
/// stalled submitter never blocks the next one (§5: suspension points are
/// per-connection, not global).
pub async fn accept_loop(
    listener: UnixListener,
    task_tx: mpsc::UnboundedSender<Task>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("queue server accept loop stopping: owner is closing");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let task_tx = task_tx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, task_tx).await;
                        });
                    }
                    Err(e) => {
                        warn!("queue server accept failed: {e}");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: Conn, task_tx: mpsc::UnboundedSender<Task>) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let raw = match read_frame_value(&mut reader).await {
        Ok(Some(value)) => value,
        Ok(None) => return, // peer closed without sending anything
        Err(e) => {
            let _ = write_frame(
                &mut write_half,
                &QueueResponse::error(
                    "",
                    "RUNTIME",
                    Some("QUEUE_REQUEST_PAYLOAD_INVALID_JSON"),
                    e.to_string(),
                ),
            )
            .await;
            return;
        }
    };

    let request: QueueRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => {
            let _ = write_frame(
                &mut write_half,
                &QueueResponse::error("", "RUNTIME", Some("QUEUE_REQUEST_INVALID"), e.to_string()),
            )
            .await;
            return;
        }
    };

    let request_id = request.request_id().to_string();
    let _ = write_frame(&mut write_half, &QueueResponse::Accepted { request_id: request_id.clone() }).await;

    let wait_for_completion = matches!(
        &request,
        QueueRequest::SubmitPrompt { wait_for_completion: true, .. }
    ) || !matches!(&request, QueueRequest::SubmitPrompt { .. });

    let (send_tx, mut send_rx) = mpsc::unbounded_channel();
    let kind = to_task_kind(request);

    if task_tx.send(Task { kind, send: send_tx }).is_err() {
        let _ = write_frame(
            &mut write_half,
            &QueueResponse::error(&request_id, "RUNTIME", Some("QUEUE_OWNER_CLOSING"), "turn controller is gone"),
        )
        .await;
        return;
    }

    if !wait_for_completion {
        // §4.B: ack + enqueue is the whole contract for a fire-and-forget
        // submit; the turn still runs to completion inside the owner, it
        // just isn't streamed back to this connection.
        return;
    }

    while let Some(response) = send_rx.recv().await {
        let terminal = response.is_terminal();
        if write_frame(&mut write_half, &response).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
    }
}

fn to_task_kind(request: QueueRequest) -> TaskKind {
    match request {
        QueueRequest::SubmitPrompt {
            request_id,
            message,
            permission_mode,
            non_interactive_permissions,
            timeout_ms,
            wait_for_completion: _,
        } => TaskKind::Submit {
            request_id,
            message,
            permission_mode,
            non_interactive_permissions,
            timeout_ms,
        },
        QueueRequest::CancelPrompt { request_id } => TaskKind::Cancel { request_id },
        QueueRequest::SetMode { request_id, mode_id, timeout_ms } => {
            TaskKind::SetMode { request_id, mode_id, timeout_ms }
        }
        QueueRequest::SetConfigOption { request_id, config_id, value, timeout_ms } => {
            TaskKind::SetConfigOption { request_id, config_id, value, timeout_ms }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acpx_core::PermissionMode;
    use acpx_rpc::{bind_unix_listener, connect_unix, read_frame, write_frame as client_write_frame};
    use tempfile::tempdir;
    use tokio::io::BufReader as ClientBufReader;

    #[tokio::test]
    async fn wait_false_submit_closes_after_accepted() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("owner.sock");
        let listener = bind_unix_listener(&socket_path).unwrap();

        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<Task>();
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(accept_loop(listener, task_tx, server_shutdown));

        // Drain the one enqueued task so the test doesn't leak the
        // channel's sender; the controller would do this in production.
        tokio::spawn(async move {
            while let Some(task) = task_rx.recv().await {
                drop(task.send);
            }
        });

        let conn = connect_unix(&socket_path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(conn);
        let mut reader = ClientBufReader::new(read_half);

        let request = QueueRequest::SubmitPrompt {
            request_id: "r1".to_string(),
            message: "hello".to_string(),
            permission_mode: PermissionMode::Confirm,
            non_interactive_permissions: None,
            timeout_ms: None,
            wait_for_completion: false,
        };
        client_write_frame(&mut write_half, &request).await.unwrap();

        let response: Option<QueueResponse> = read_frame(&mut reader).await.unwrap();
        assert!(matches!(response, Some(QueueResponse::Accepted { .. })));

        let closed: Option<QueueResponse> = read_frame(&mut reader).await.unwrap();
        assert!(closed.is_none());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn invalid_json_is_rejected_without_crashing_server() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("owner.sock");
        let listener = bind_unix_listener(&socket_path).unwrap();

        let (task_tx, _task_rx) = mpsc::unbounded_channel::<Task>();
        let shutdown = CancellationToken::new();
        tokio::spawn(accept_loop(listener, task_tx, shutdown.clone()));

        let conn = connect_unix(&socket_path).await.unwrap();
        let (read_half, mut write_half) = tokio::io::split(conn);
        use tokio::io::AsyncWriteExt;
        write_half.write_all(b"not json\n").await.unwrap();

        let mut reader = ClientBufReader::new(read_half);
        let response: Option<QueueResponse> = read_frame(&mut reader).await.unwrap();
        match response {
            Some(QueueResponse::Error { detail_code, .. }) => {
                assert_eq!(detail_code.as_deref(), Some("QUEUE_REQUEST_PAYLOAD_INVALID_JSON"));
            }
            other => panic!("expected error response, got {other:?}"),
        }

        shutdown.cancel();
    }
}
