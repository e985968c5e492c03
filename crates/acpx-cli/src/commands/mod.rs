//! Subcommand dispatch: each module owns one [`crate::cli::Commands`]
//! variant and returns the [`ExitCode`] the process should terminate with.

mod cancel;
mod close;
mod list;
mod prompt;
mod set_config_option;
mod set_mode;
mod show;

use crate::cli::{Cli, Commands};
use crate::config;
use crate::output::Renderer;
use acpx_protocol::queue::QueueResponse;
use acpx_protocol::{AcpxError, ErrorKind, ExitCode, Origin};
use std::path::PathBuf;

/// Everything a subcommand needs that isn't specific to its own arguments.
pub struct Context {
    pub home: PathBuf,
    pub cwd: PathBuf,
    pub agent_command: Option<String>,
    pub name: Option<String>,
    pub renderer: Renderer,
}

impl Context {
    /// `agent_command` is required by every subcommand that can spawn or
    /// address an owner; `show`/`close`/`list` only need it when no
    /// explicit `recordId` was given.
    fn require_agent_command(&self) -> Result<&str, AcpxError> {
        self.agent_command
            .as_deref()
            .ok_or_else(|| AcpxError::usage("--agent-command is required (or set ACPX_AGENT_COMMAND)"))
    }
}

pub async fn dispatch(cli: Cli) -> ExitCode {
    let renderer = Renderer::new(cli.format);

    let cwd = match config::resolve_cwd(cli.cwd) {
        Ok(cwd) => cwd,
        Err(e) => {
            renderer.error(&AcpxError::usage(format!("could not resolve cwd: {e}")));
            return ExitCode::Usage;
        }
    };

    let ctx = Context {
        home: config::resolve_home(cli.home),
        cwd,
        agent_command: cli.agent_command,
        name: cli.name,
        renderer,
    };

    let result = match cli.command {
        Commands::Prompt { message, permission_mode, timeout_ms, no_wait } => {
            prompt::run(&ctx, message, permission_mode.into(), timeout_ms, !no_wait).await
        }
        Commands::Cancel => cancel::run(&ctx).await,
        Commands::SetMode { mode_id, timeout_ms } => set_mode::run(&ctx, mode_id, timeout_ms).await,
        Commands::SetConfigOption { config_id, value, timeout_ms } => {
            set_config_option::run(&ctx, config_id, value, timeout_ms).await
        }
        Commands::List { all } => list::run(&ctx, all).await,
        Commands::Show { record_id } => show::run(&ctx, record_id).await,
        Commands::Close { record_id } => close::run(&ctx, record_id).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            ctx.renderer.error(&e);
            e.exit_code()
        }
    }
}

/// Turn a terminal `error` frame (§4.I: "Queue errors preserve
/// `{outputCode, detailCode, origin, retryable, acpPayload}`") into an
/// [`AcpxError`] the dispatcher can map to an exit code.
pub(crate) fn queue_response_error(response: QueueResponse) -> AcpxError {
    match response {
        QueueResponse::Error { code, detail_code, message, .. } => {
            let kind = match code.as_str() {
                "NO_SESSION" => ErrorKind::NoSession,
                "TIMEOUT" => ErrorKind::Timeout,
                "PERMISSION_DENIED" => ErrorKind::PermissionDenied,
                "USAGE" => ErrorKind::Usage,
                _ => ErrorKind::Runtime,
            };
            let mut err = AcpxError::new(kind, Origin::Queue, message);
            if let Some(detail) = detail_code {
                err = err.with_detail(detail);
            }
            err
        }
        other => AcpxError::runtime(Origin::Queue, format!("unexpected terminal frame: {other:?}")),
    }
}
