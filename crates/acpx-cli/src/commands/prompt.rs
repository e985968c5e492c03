use crate::commands::{queue_response_error, Context};
use crate::config::{forwarded_auth, DEFAULT_TTL_MS};
use crate::session;
use crate::submitter::{self, SubmitOutcome};
use acpx_core::PermissionMode;
use acpx_protocol::queue::{QueueOwnerPayload, QueueRequest, QueueResponse};
use acpx_protocol::{AcpxError, ExitCode};
use uuid::Uuid;

pub async fn run(
    ctx: &Context,
    message: String,
    permission_mode: PermissionMode,
    timeout_ms: Option<u64>,
    wait_for_completion: bool,
) -> Result<ExitCode, AcpxError> {
    let agent_command = ctx.require_agent_command()?;
    let record = session::resolve_or_create(&ctx.home, agent_command, &ctx.cwd, ctx.name.as_deref())?;

    let request_id = Uuid::new_v4().to_string();
    let request = QueueRequest::SubmitPrompt {
        request_id,
        message,
        permission_mode,
        non_interactive_permissions: None,
        timeout_ms,
        wait_for_completion,
    };

    let auth = forwarded_auth();
    let payload = || QueueOwnerPayload {
        session_id: record.record_id.clone(),
        agent_command: agent_command.to_string(),
        cwd: record.cwd.clone(),
        name: record.name.clone(),
        permission_mode,
        auth: auth.clone(),
        ttl_ms: DEFAULT_TTL_MS,
        verbose: false,
    };

    let renderer = ctx.renderer;
    let outcome = submitter::submit(&ctx.home, &record.record_id, request, wait_for_completion, payload, |request_id, event| {
        renderer.event(request_id, event);
    })
    .await?;

    match outcome {
        SubmitOutcome::Enqueued => Ok(ExitCode::Success),
        SubmitOutcome::Terminal(QueueResponse::Result { result, .. }) => {
            renderer.result(&result);
            Ok(ExitCode::Success)
        }
        SubmitOutcome::Terminal(other) => Err(queue_response_error(other)),
    }
}
