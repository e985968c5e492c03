//! Turning a raw `agentCommand` string into a spawnable [`tokio::process::Command`]
//! with the auth environment composed in (§4.D.1, §4.D.3).

use crate::error::{AcpError, Origin, Result};
use acpx_core::to_env_token;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// One configured auth method: an id (e.g. `"anthropic-api-key"`) mapped to
/// a credential value the supervisor may inject into the child's env.
pub type AuthCredentials = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct AgentCommandConfig {
    pub agent_command: String,
    pub cwd: PathBuf,
    pub auth: AuthCredentials,
}

/// Build a [`Command`] ready to spawn, with stdio piped and the auth
/// environment composed per §4.D.3: for each `{methodId: credential}`,
/// inject `methodId`, `toEnvToken(methodId)`, and `ACPX_AUTH_<token>` —
/// whichever of the three are not already present in the inherited
/// environment.
pub fn build_command(config: &AgentCommandConfig) -> Result<Command> {
    let argv = acpx_core::parse_command(&config.agent_command)
        .map_err(|e| AcpError::usage(e.to_string()))?;

    let (program, args) = argv
        .split_first()
        .expect("parse_command never returns an empty argv");

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.current_dir(&config.cwd);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    for (method_id, credential) in &config.auth {
        let token = to_env_token(method_id);
        if std::env::var_os(method_id).is_none() {
            cmd.env(method_id, credential);
        }
        if std::env::var_os(&token).is_none() {
            cmd.env(&token, credential);
        }
        let acpx_var = format!("ACPX_AUTH_{}", token);
        if std::env::var_os(&acpx_var).is_none() {
            cmd.env(&acpx_var, credential);
        }
    }

    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_agent_command() {
        let config = AgentCommandConfig {
            agent_command: "   ".to_string(),
            cwd: PathBuf::from("."),
            auth: BTreeMap::new(),
        };
        let err = build_command(&config).unwrap_err();
        assert_eq!(err.kind, acpx_protocol::ErrorKind::Usage);
    }

    #[test]
    fn splits_quoted_arguments() {
        let config = AgentCommandConfig {
            agent_command: r#"my-agent --flag "a value""#.to_string(),
            cwd: PathBuf::from("."),
            auth: BTreeMap::new(),
        };
        // Just verify it parses without error; the process itself isn't spawned here.
        assert!(build_command(&config).is_ok());
    }
}
