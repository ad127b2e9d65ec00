//! Liveness enforcement for idle connections.
//!
//! A single sweep coroutine per server wakes periodically and closes every
//! connection that has received no bytes for longer than the configured
//! timeout. Only received traffic counts: a handler that is still running on
//! behalf of a silent client does not keep the connection alive.

use crate::coroutine;
use crate::server::connection::{CloseReason, ConnectionSet};
use crate::server::stats::ServerStats;
use may::coroutine::JoinHandle;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(5);
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running sweep coroutine.
pub struct HeartbeatMonitor {
    timeout: Duration,
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start sweeping `connections` every [`sweep_interval`] of `timeout`.
    pub fn spawn(
        timeout: Duration,
        connections: Arc<ConnectionSet>,
        stats: Arc<ServerStats>,
        stack_size: usize,
    ) -> io::Result<Self> {
        let interval = sweep_interval(timeout);
        let handle = coroutine::spawn("mayrpc-heartbeat".to_string(), stack_size, move || loop {
            may::coroutine::sleep(interval);
            sweep(&connections, timeout, &stats);
        })?;
        info!(
            timeout_ms = timeout.as_millis() as u64,
            interval_ms = interval.as_millis() as u64,
            "Heartbeat monitor started"
        );
        Ok(Self { timeout, handle })
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancel the sweep and wait for it to exit.
    pub fn stop(self) {
        coroutine::cancel_and_join(self.handle);
        debug!("Heartbeat monitor stopped");
    }
}

/// How often to sweep for a given timeout: a quarter of it, within bounds.
#[must_use]
pub fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 4).clamp(MIN_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL)
}

/// Close connections idle for longer than `timeout`. Returns how many were closed.
pub fn sweep(connections: &ConnectionSet, timeout: Duration, stats: &ServerStats) -> usize {
    let mut closed = 0;
    for conn in connections.live() {
        let idle = conn.idle_for();
        if idle > timeout
            && conn.close_with(CloseReason::HeartbeatTimeout, || {
                stats.record_heartbeat_closure()
            })
        {
            debug!(
                connection_id = %conn.id(),
                idle_ms = idle.as_millis() as u64,
                "Heartbeat deadline exceeded"
            );
            closed += 1;
        }
    }
    closed
}
