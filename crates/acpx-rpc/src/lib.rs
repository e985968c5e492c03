//! Lease & IPC locator (§4.A): deterministic lock-file/socket derivation,
//! the single-owner acquisition protocol, and the NDJSON line framing
//! shared by the queue-owner server and the submitter client.
//!
//! This crate knows nothing about *what* flows over the socket once
//! connected (that's `acpx-protocol::queue`) or how the owner decides
//! what to do with a request (that's `acpx-daemon`).

pub mod framing;
pub mod lease;

pub use framing::{read_frame, read_frame_value, write_frame};
pub use lease::{
    lease_key, lock_path, pid_is_alive, queues_dir, read_lease, release, try_acquire_lease, Lease,
    LeaseError,
};

#[cfg(unix)]
pub use framing::{bind_unix_listener, connect_unix, Conn};
#[cfg(unix)]
pub use lease::socket_path;

#[cfg(windows)]
pub use lease::pipe_name;
