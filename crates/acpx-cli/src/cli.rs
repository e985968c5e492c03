//! Argument parsing (§1: "Output formatter / CLI front-end", a narrow
//! collaborator specified only by its contract — everything here is a typed
//! interface the core consumes, never logic the core depends on).

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Quiet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[value(rename_all = "kebab-case")]
pub enum PermissionModeArg {
    ApproveAll,
    DenyAll,
    #[default]
    Confirm,
}

impl From<PermissionModeArg> for acpx_core::PermissionMode {
    fn from(value: PermissionModeArg) -> Self {
        match value {
            PermissionModeArg::ApproveAll => acpx_core::PermissionMode::ApproveAll,
            PermissionModeArg::DenyAll => acpx_core::PermissionMode::DenyAll,
            PermissionModeArg::Confirm => acpx_core::PermissionMode::Confirm,
        }
    }
}

#[derive(Parser)]
#[command(name = "acpx")]
#[command(about = "Headless command-line driver for Agent-Client-Protocol adapters")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Shortcut for --log-level=debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output rendering: text, json, or quiet (errors and exit code only)
    #[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Override the acpx home directory (defaults to the user's home dir)
    #[arg(long, global = true, env = "ACPX_HOME")]
    pub home: Option<PathBuf>,

    /// The agent adapter command to spawn, e.g. "claude-code-acp --flag"
    #[arg(short = 'a', long, global = true, env = "ACPX_AGENT_COMMAND")]
    pub agent_command: Option<String>,

    /// Working directory the session is scoped to (defaults to the CLI's cwd)
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Optional name distinguishing multiple sessions in the same cwd
    #[arg(short = 'n', long, global = true)]
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a prompt to the session, resuming or creating it as needed
    Prompt {
        /// The prompt text
        message: String,

        /// How fs writes and permission requests are resolved
        #[arg(long, value_enum, default_value = "confirm")]
        permission_mode: PermissionModeArg,

        /// Abandon the turn after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Enqueue the prompt without waiting for it to complete
        #[arg(long)]
        no_wait: bool,
    },

    /// Cancel the in-flight prompt for this session, if any
    Cancel,

    /// Switch the session's active mode
    SetMode {
        mode_id: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Set a session-scoped configuration option
    SetConfigOption {
        config_id: String,
        /// JSON value; bare scalars (true, 5, "text") are accepted
        value: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// List known sessions
    List {
        /// Include closed sessions
        #[arg(long)]
        all: bool,
    },

    /// Show one session's record
    Show {
        /// Record id (defaults to the session scoped to --cwd/--agent-command/--name)
        record_id: Option<String>,
    },

    /// Mark a session closed without tearing down a live owner
    Close {
        record_id: Option<String>,
    },
}
