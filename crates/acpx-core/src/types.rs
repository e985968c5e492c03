//! Small shared value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable local key for a session, independent of the ACP protocol's own
/// session identifier. Cheap to clone, used as a map key in several places.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Governs how `fs/write_text_file` and `session/request_permission` are
/// resolved without a human in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Every write and permission request is granted automatically.
    ApproveAll,
    /// Every write and permission request is denied automatically.
    DenyAll,
    /// Writes and permission requests are routed to a confirmation callback.
    Confirm,
}

impl Default for PermissionMode {
    fn default() -> Self {
        Self::Confirm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_displays_as_inner_string() {
        let id = SessionId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn permission_mode_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::ApproveAll).unwrap(),
            "\"approve-all\""
        );
        assert_eq!(
            serde_json::to_string(&PermissionMode::DenyAll).unwrap(),
            "\"deny-all\""
        );
    }

    #[test]
    fn permission_mode_default_is_confirm() {
        assert_eq!(PermissionMode::default(), PermissionMode::Confirm);
    }
}
