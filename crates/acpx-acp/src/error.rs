//! This crate reports through the shared [`acpx_protocol::AcpxError`]
//! taxonomy rather than inventing its own; the ACP wire crate's own error
//! type is folded in via `From` (implemented in `acpx_protocol`, since
//! neither `AcpxError` nor `agent_client_protocol::Error` is local to this
//! crate).

pub use acpx_protocol::{AcpxError as AcpError, Origin};

pub type Result<T> = std::result::Result<T, AcpError>;
