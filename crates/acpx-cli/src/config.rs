//! CLI-resolved configuration: the handful of values the submitter and
//! session resolver need that don't belong to any one subcommand. No
//! config-file layer — argument parsing and config-file parsing are both
//! explicitly out of scope for the core (§1), and the CLI keeps to flags
//! and environment variables for the same reason.

use std::path::PathBuf;

/// Idle TTL the owner uses before it tears itself down (§5). Generous
/// enough that a user issuing a handful of prompts in a shell session
/// never pays the spawn cost twice.
pub const DEFAULT_TTL_MS: u64 = 10 * 60 * 1000;

pub fn resolve_home(override_home: Option<PathBuf>) -> PathBuf {
    override_home
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn resolve_cwd(override_cwd: Option<PathBuf>) -> std::io::Result<PathBuf> {
    match override_cwd {
        Some(path) => std::fs::canonicalize(path),
        None => std::env::current_dir(),
    }
}

/// Auth credentials the owner's agent child may need, harvested from the
/// environment (§6: "Per auth method: `<methodId>`, `<ENV_TOKEN(methodId)>`,
/// and `ACPX_AUTH_<ENV_TOKEN>`"). The CLI itself doesn't know which auth
/// methods the agent will ask for, so it only forwards the acpx-specific
/// `ACPX_AUTH_*` overrides explicitly; the rest the owner's child inherits
/// directly from its own environment when it spawns.
pub fn forwarded_auth() -> std::collections::BTreeMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("ACPX_AUTH_").map(|token| (token.to_lowercase(), value))
        })
        .collect()
}
