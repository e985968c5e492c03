use crate::commands::Context;
use crate::session;
use acpx_daemon::store;
use acpx_protocol::{AcpxError, ExitCode, Origin};

/// Mark a session closed without tearing down a live owner (§3: `closed`
/// records are simply ignored by scope lookup from then on; a running
/// owner tears itself down on its own idle TTL rather than being killed
/// here).
pub async fn run(ctx: &Context, record_id: Option<String>) -> Result<ExitCode, AcpxError> {
    let agent_command = match record_id.as_deref() {
        Some(_) => "",
        None => ctx.require_agent_command()?,
    };
    let mut record = session::resolve_existing(&ctx.home, record_id.as_deref(), agent_command, &ctx.cwd, ctx.name.as_deref())?;

    record.closed = true;
    record.closed_at = Some(chrono::Utc::now());

    store::write_record(&ctx.home, &record)
        .map_err(|e| AcpxError::runtime(Origin::Runtime, format!("failed to write closed session record: {e}")))?;

    ctx.renderer.record(&record);
    Ok(ExitCode::Success)
}
