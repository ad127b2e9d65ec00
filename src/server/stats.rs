//! Server-wide counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ServerStats {
    accepted: AtomicU64,
    dispatched: AtomicU64,
    responses_written: AtomicU64,
    unsupported_functions: AtomicU64,
    heartbeat_closures: AtomicU64,
    write_failures: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub dispatched: u64,
    pub responses_written: u64,
    pub unsupported_functions: u64,
    pub heartbeat_closures: u64,
    pub write_failures: u64,
}

impl ServerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, frames: u64) {
        self.responses_written.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_unsupported_function(&self) {
        self.unsupported_functions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_closure(&self) {
        self.heartbeat_closures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_responses_written(&self) -> u64 {
        self.responses_written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_unsupported_functions(&self) -> u64 {
        self.unsupported_functions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_heartbeat_closures(&self) -> u64 {
        self.heartbeat_closures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn get_write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.get_accepted(),
            dispatched: self.get_dispatched(),
            responses_written: self.get_responses_written(),
            unsupported_functions: self.get_unsupported_functions(),
            heartbeat_closures: self.get_heartbeat_closures(),
            write_failures: self.get_write_failures(),
        }
    }
}
