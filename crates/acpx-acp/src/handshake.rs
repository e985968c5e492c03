//! `initialize` + `authenticate` handshake (§4.D.5, §4.D.6).

use crate::error::{AcpError, Origin, Result};
use crate::transport::{next_request_id, request_envelope, Transport};
use agent_client_protocol::{
    AuthenticateRequest, ClientCapabilities, FileSystemCapability, InitializeRequest,
    InitializeResponse,
};
use std::collections::BTreeMap;

/// What happens when none of the agent's advertised auth methods has a
/// matching credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCredentialPolicy {
    /// Abort the connection attempt.
    Fail,
    /// Proceed without authenticating; the agent may auth internally.
    Skip,
}

fn fixed_client_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        fs: FileSystemCapability {
            read_text_file: true,
            write_text_file: true,
        },
        terminal: true,
        ..Default::default()
    }
}

/// Send `initialize` with acpx's fixed capability set and parse the result.
pub async fn initialize(transport: &mut Transport) -> Result<InitializeResponse> {
    let request = InitializeRequest {
        protocol_version: 1u16.into(),
        client_info: None,
        client_capabilities: fixed_client_capabilities(),
        meta: None,
    };

    let id = next_request_id();
    let envelope = request_envelope(id, "initialize", serde_json::to_value(&request)?);
    transport.write_value(&envelope).await?;

    let response = transport.read_value().await?;
    extract_result(&response)
}

/// Resolve which (if any) of the agent's advertised auth methods has a
/// known credential and call `authenticate` for it.
///
/// Credential lookup order for each advertised `methodId`: the process
/// environment (keyed by the id itself, then its `toEnvToken` form), then
/// the explicitly configured auth map.
pub async fn authenticate_if_needed(
    transport: &mut Transport,
    auth_method_ids: &[String],
    configured: &BTreeMap<String, String>,
    policy: NoCredentialPolicy,
) -> Result<Option<String>> {
    if auth_method_ids.is_empty() {
        return Ok(None);
    }

    let chosen = auth_method_ids.iter().find(|method_id| {
        let token = acpx_core::to_env_token(method_id);
        std::env::var_os(method_id).is_some()
            || std::env::var_os(&token).is_some()
            || configured.contains_key(method_id.as_str())
    });

    let method_id = match chosen {
        Some(id) => id.clone(),
        None => {
            return match policy {
                NoCredentialPolicy::Fail => Err(AcpError::runtime(
                    Origin::Acp,
                    "no credential available for any advertised auth method",
                )),
                NoCredentialPolicy::Skip => Ok(None),
            };
        }
    };

    let request = AuthenticateRequest {
        method_id: method_id.clone().into(),
        meta: None,
    };
    let id = next_request_id();
    let envelope = request_envelope(id, "authenticate", serde_json::to_value(&request)?);
    transport.write_value(&envelope).await?;

    let response = transport.read_value().await?;
    let _: serde_json::Value = extract_result(&response)?;

    Ok(Some(method_id))
}

pub fn extract_result<T: serde::de::DeserializeOwned>(response: &serde_json::Value) -> Result<T> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("agent returned an error")
            .to_string();
        return Err(AcpError::from_jsonrpc_error(
            code,
            &message,
            Origin::Acp,
            error.clone(),
        ));
    }

    let result = response
        .get("result")
        .ok_or_else(|| AcpError::runtime(Origin::Acp, "response missing both result and error"))?;

    Ok(serde_json::from_value(result.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_result_parses_success() {
        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        let value: serde_json::Value = extract_result(&response).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn extract_result_maps_resource_not_found() {
        let response =
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32002, "message": "gone"}});
        let err = extract_result::<serde_json::Value>(&response).unwrap_err();
        assert_eq!(err.kind, acpx_protocol::ErrorKind::NoSession);
    }

    #[tokio::test]
    async fn authenticate_is_skipped_when_no_methods_advertised() {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        let mut transport = Transport::from_boxed(Box::pin(w), Box::pin(tokio::io::BufReader::new(r)));
        let result = authenticate_if_needed(
            &mut transport,
            &[],
            &BTreeMap::new(),
            NoCredentialPolicy::Fail,
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }
}
