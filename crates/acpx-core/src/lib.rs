//! Shared types and traits used across the acpx session runtime.
//!
//! This crate has no knowledge of IPC framing, the filesystem layout, or the
//! ACP wire protocol itself — it only carries the small vocabulary the other
//! crates need to agree on: session identifiers, permission modes, the
//! dynamic-dispatch seam between the turn controller and an active ACP
//! session, and the POSIX-like quoting rules for `agentCommand`.

pub mod env_token;
pub mod quoting;
pub mod traits;
pub mod types;

pub use env_token::to_env_token;
pub use quoting::{parse_command, QuoteError};
pub use traits::{ActiveSessionController, ControlError, ControlOutcome};
pub use types::{PermissionMode, SessionId};
