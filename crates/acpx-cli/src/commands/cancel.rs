use crate::commands::{queue_response_error, Context};
use crate::session;
use crate::submitter::{self, SubmitOutcome};
use acpx_protocol::queue::{QueueRequest, QueueResponse};
use acpx_protocol::{AcpxError, ExitCode};
use uuid::Uuid;

pub async fn run(ctx: &Context) -> Result<ExitCode, AcpxError> {
    let agent_command = ctx.require_agent_command()?;
    let record = session::resolve_existing(&ctx.home, None, agent_command, &ctx.cwd, ctx.name.as_deref())?;

    if !submitter::has_live_owner(&ctx.home, &record.record_id) {
        // Nothing is running; there is no prompt to cancel. Spawning an
        // owner just to hear it say "false" would start an agent child
        // for no reason.
        ctx.renderer.cancel_result(false);
        return Ok(ExitCode::Success);
    }

    let request = QueueRequest::CancelPrompt { request_id: Uuid::new_v4().to_string() };

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
        SubmitOutcome::Enqueued => unreachable!("cancel always waits for completion"),
        SubmitOutcome::Terminal(QueueResponse::CancelResult { cancelled, .. }) => {
            ctx.renderer.cancel_result(cancelled);
            Ok(ExitCode::Success)
        }
        SubmitOutcome::Terminal(other) => Err(queue_response_error(other)),
    }
}
