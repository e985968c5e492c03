use acpx_cli::cli::Cli;
use acpx_cli::commands;
use acpx_cli::config;
use acpx_protocol::queue::QueueOwnerPayload;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

/// A detached owner process is just this same binary re-exec'd with its
/// session payload passed via an env var rather than argv (§4.G, §6) —
/// it has no CLI-parsing dependency, so this branch must run *before*
/// `Cli::parse()` ever sees the (argument-less) invocation.
#[tokio::main]
async fn main() {
    if let Ok(payload_json) = std::env::var("ACPX_QUEUE_OWNER_PAYLOAD") {
        run_as_owner(payload_json).await;
        return;
    }

    let cli = Cli::parse();

    let level: LevelFilter = if cli.verbose { LevelFilter::DEBUG } else { cli.log_level.into() };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = commands::dispatch(cli).await;
    std::process::exit(i32::from(exit_code));
}

async fn run_as_owner(payload_json: String) {
    let payload: QueueOwnerPayload = match serde_json::from_str(&payload_json) {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("invalid ACPX_QUEUE_OWNER_PAYLOAD: {e}");
            std::process::exit(i32::from(acpx_protocol::ExitCode::Usage));
        }
    };

    let level = if payload.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let home = config::resolve_home(None);
    let exit_code = acpx_daemon::run_owner(home, payload).await;
    std::process::exit(i32::from(exit_code));
}
