//! Wire and record types shared by the queue owner, the submitter client,
//! and the output formatter. Nothing in here performs I/O.

pub mod error;
pub mod queue;
pub mod record;

pub use error::{AcpxError, ErrorKind, ExitCode, Origin};
pub use queue::{
    PermissionStats, QueueOwnerPayload, QueueOwnerRecord, QueueRequest, QueueResponse,
    SessionSendResult,
};
pub use record::{EventLogMeta, ExitReason, LastAgentExit, ScopeKey, SessionRecord, TurnHistoryEntry};

/// Default rotation thresholds (§6).
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_SEGMENTS: u32 = 5;
