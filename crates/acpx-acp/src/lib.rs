//! ACP client supervisor (§4.D): spawns the agent child, drives the
//! `initialize`/`authenticate` handshake, serializes streaming
//! `sessionUpdate` notifications, and serves the agent's `fs/*`,
//! `terminal/*`, and `session/request_permission` callbacks.
//!
//! Nothing in this crate knows about the queue-owner IPC protocol or the
//! filesystem layout of session records — it only knows how to be one end
//! of a single ACP connection.

pub mod client;
pub mod command;
pub mod error;
pub mod fs_guard;
pub mod handshake;
pub mod serializer;
pub mod supervisor;
pub mod terminal;
pub mod transport;

pub use client::{ClientEndpoint, ClientHandler, NonInteractiveHandler, PermissionDecision, WritePreview};
pub use command::{build_command, AgentCommandConfig, AuthCredentials};
pub use error::{AcpError, Result};
pub use handshake::NoCredentialPolicy;
pub use serializer::SessionUpdateSerializer;
pub use supervisor::{AgentLifecycle, AgentSupervisor, LastExit, SupervisorConfig};
pub use terminal::{TerminalHandle, TerminalManager};
pub use transport::{AgentProcess, Transport, TransportReader, TransportWriter};
