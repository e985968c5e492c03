use crate::commands::{queue_response_error, Context};
use crate::session;
use crate::submitter::{self, SubmitOutcome};
use acpx_protocol::queue::{QueueRequest, QueueResponse};
use acpx_protocol::{AcpxError, ExitCode, Origin};
use serde_json::Value;
use uuid::Uuid;

/// Bare scalars (`true`, `5`, `text`) are accepted alongside well-formed
/// JSON (§6 `setSessionConfigOption`); anything that doesn't parse as JSON
/// is passed through as a plain string rather than rejected.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn run(
    ctx: &Context,
    config_id: String,
    value: String,
    timeout_ms: Option<u64>,
) -> Result<ExitCode, AcpxError> {
    let agent_command = ctx.require_agent_command()?;
    let record = session::resolve_existing(&ctx.home, None, agent_command, &ctx.cwd, ctx.name.as_deref())?;

    if !submitter::has_live_owner(&ctx.home, &record.record_id) {
        return Err(AcpxError::no_session(Origin::Cli, "no running owner for this session; submit a prompt first"));
    }

    let request = QueueRequest::SetConfigOption {
        request_id: Uuid::new_v4().to_string(),
        config_id,
        value: parse_value(&value),
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
        SubmitOutcome::Enqueued => unreachable!("set_config_option always waits for completion"),
        SubmitOutcome::Terminal(QueueResponse::SetConfigOptionResult { applied, .. }) => {
            ctx.renderer.control_result("setConfigOption", applied);
            Ok(ExitCode::Success)
        }
        SubmitOutcome::Terminal(other) => Err(queue_response_error(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_json_scalars() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("5"), Value::Number(5.into()));
        assert_eq!(parse_value("\"text\""), Value::String("text".to_string()));
    }

    #[test]
    fn bare_unquoted_strings_fall_back_to_string() {
        assert_eq!(parse_value("text"), Value::String("text".to_string()));
    }
}
