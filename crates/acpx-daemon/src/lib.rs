//! The queue-owner process: lease acquisition, the turn-controller state
//! machine, the IPC accept loop, and record/event-log persistence (§4.A,
//! §4.B, §4.C, §4.H).

pub mod controller;
pub mod event_log;
pub mod fallback;
pub mod owner;
pub mod server;
pub mod store;

pub use controller::{ControllerState, ShutdownReason, Task, TaskKind, TurnController};
pub use owner::run as run_owner;
