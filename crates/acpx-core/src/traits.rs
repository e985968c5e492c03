//! The dynamic-dispatch seam between the turn controller and a live ACP
//! session.
//!
//! The turn controller (in `acpx-daemon`) never talks to the ACP client
//! supervisor directly; it goes through this trait so that control requests
//! (`cancel`, `set_mode`, `set_config_option`) can be served either by an
//! active supervisor or, when none is running, by a short-lived fallback
//! implementation that reconnects just long enough to issue one RPC.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Outcome of attempting to apply a mode or config change.
#[derive(Debug, Clone)]
pub struct ControlOutcome {
    pub applied: bool,
    pub detail: Option<Value>,
}

/// Error surfaced by a control RPC (`set_mode` / `set_config_option`).
/// Deliberately minimal: the richer error taxonomy (with exit-code mapping)
/// lives in `acpx-protocol`, which wraps these via `From`.
#[derive(Debug, Clone)]
pub struct ControlError {
    pub message: String,
    pub timed_out: bool,
}

impl ControlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ControlError {}

pub type Result<T> = std::result::Result<T, ControlError>;

/// Abstraction over "the thing a turn controller can send control requests
/// to right now" — either the live ACP supervisor for an active turn, or a
/// fallback that reconnects on demand.
#[async_trait]
pub trait ActiveSessionController: Send + Sync {
    /// True if a `prompt` RPC is currently outstanding for this session.
    async fn has_active_prompt(&self) -> bool;

    /// Ask the agent to cancel the in-flight prompt. Returns `true` if the
    /// agent acknowledged (or was never prompted, so there was nothing to
    /// cancel but the request still counts as satisfied).
    async fn request_cancel_active_prompt(&self) -> bool;

    /// Issue `setSessionMode`. Bounded by the caller via a timeout wrapper.
    async fn set_session_mode(&self, mode_id: &str) -> Result<ControlOutcome>;

    /// Issue `setSessionConfigOption`. Bounded by the caller via a timeout
    /// wrapper.
    async fn set_session_config_option(
        &self,
        config_id: &str,
        value: Value,
    ) -> Result<ControlOutcome>;
}
