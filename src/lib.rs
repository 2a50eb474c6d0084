//! Host bridge for the hookcast dispatch engine.
//!
//! The `hookcast` binary wires configuration, PostgreSQL-backed collaborators
//! and the [`hookcast_delivery::Dispatcher`] together, then feeds it events
//! read as newline-delimited JSON from the host application.

pub mod bridge;
pub mod config;

pub use bridge::{BridgeReply, BridgeSummary};
pub use config::Config;
