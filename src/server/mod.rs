//! # Server Module
//!
//! Connection lifecycle, response ordering and the server controller.
//!
//! ## Components
//!
//! - [`RpcServer`] - lifecycle controller (start/async-start/stop/restart)
//! - [`listener`] - binds the port and accepts connections
//! - [`connection`] - per-client frame state machine
//! - [`write_queue`] - per-connection ordered response slots
//! - [`heartbeat`] - idle-connection sweep
//! - [`transport`] - pluggable read/write policy for fault injection
//! - [`stats`] - server-wide counters

pub mod connection;
mod controller;
pub mod heartbeat;
pub mod listener;
pub mod stats;
pub mod transport;
pub mod write_queue;

pub use connection::{CloseReason, Connection, ConnectionSet};
pub use controller::{RpcServer, ServerState};
pub use stats::{ServerStats, StatsSnapshot};
pub use transport::{FailingWrites, Passthrough, TransportPolicy};
