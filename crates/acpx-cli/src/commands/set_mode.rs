use crate::commands::{queue_response_error, Context};
use crate::session;
use crate::submitter::{self, SubmitOutcome};
use acpx_protocol::queue::{QueueRequest, QueueResponse};
use acpx_protocol::{AcpxError, ExitCode, Origin};
use uuid::Uuid;

pub async fn run(ctx: &Context, mode_id: String, timeout_ms: Option<u64>) -> Result<ExitCode, AcpxError> {
    let agent_command = ctx.require_agent_command()?;
    let record = session::resolve_existing(&ctx.home, None, agent_command, &ctx.cwd, ctx.name.as_deref())?;

    if !submitter::has_live_owner(&ctx.home, &record.record_id) {
        return Err(AcpxError::no_session(Origin::Cli, "no running owner for this session; submit a prompt first"));
    }

    let request = QueueRequest::SetMode {
        request_id: Uuid::new_v4().to_string(),
        mode_id,
        timeout_ms,
    };

    let outcome = submitter::submit(
        &ctx.home,
        &record.record_id,
        request,
        true,
        || unreachable!("owner is already live, spawn_payload should not be called"),
        |_, _| {},
    )
    .await?;

    match outcome {
        SubmitOutcome::Enqueued => unreachable!("set_mode always waits for completion"),
        SubmitOutcome::Terminal(QueueResponse::SetModeResult { applied, .. }) => {
            ctx.renderer.control_result("setMode", applied);
            Ok(ExitCode::Success)
        }
        SubmitOutcome::Terminal(other) => Err(queue_response_error(other)),
    }
}
