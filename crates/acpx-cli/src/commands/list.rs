use crate::commands::Context;
use acpx_daemon::store;
use acpx_protocol::{AcpxError, ExitCode};

pub async fn run(ctx: &Context, all: bool) -> Result<ExitCode, AcpxError> {
    let mut records = store::list_records(&ctx.home);
    if !all {
        records.retain(|r| !r.closed);
    }
    records.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));

    ctx.renderer.records(&records);
    Ok(ExitCode::Success)
}
