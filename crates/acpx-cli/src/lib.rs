//! Output formatter / CLI front-end (§1): argument parsing, the submitter
//! client, and text/json/quiet rendering. Everything here is a narrow
//! collaborator around the daemon/protocol/acp core — no concurrency
//! runtime lives in this crate.

pub mod cli;
pub mod commands;
pub mod config;
pub mod output;
pub mod session;
pub mod submitter;
