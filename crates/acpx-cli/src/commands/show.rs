use crate::commands::Context;
use crate::session;
use acpx_protocol::{AcpxError, ExitCode};

pub async fn run(ctx: &Context, record_id: Option<String>) -> Result<ExitCode, AcpxError> {
    let agent_command = match record_id.as_deref() {
        Some(_) => "",
        None => ctx.require_agent_command()?,
    };
    let record = session::resolve_existing(&ctx.home, record_id.as_deref(), agent_command, &ctx.cwd, ctx.name.as_deref())?;

    ctx.renderer.record(&record);
    Ok(ExitCode::Success)
}
