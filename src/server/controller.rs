//! Server lifecycle.
//!
//! ```text
//!   Stopped ──start──► Starting ──bound──► Running ──stop──► Stopping ──► Stopped
//!      ▲                   │
//!      └───bind failed─────┘
//! ```
//!
//! Transitions happen under one mutex, so concurrent `start` calls never
//! double-bind and exactly one concurrent `stop` performs the teardown while
//! the others wait for it to finish.

use crate::coroutine;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::protocol::FunctionId;
use crate::registry::{HandlerDescriptor, HandlerRegistry};
use crate::runtime_config::ServerConfig;
use crate::server::connection::{CloseReason, ConnectionContext, ConnectionSet};
use crate::server::heartbeat::HeartbeatMonitor;
use crate::server::listener::Listener;
use crate::server::stats::{ServerStats, StatsSnapshot};
use crate::server::transport::{Passthrough, TransportPolicy};
use may::coroutine::JoinHandle;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of an [`RpcServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

struct Lifecycle {
    state: ServerState,
    local_addr: Option<SocketAddr>,
    acceptor: Option<JoinHandle<()>>,
    heartbeat: Option<HeartbeatMonitor>,
    /// Bumped on every transition into `Stopped`, so blocking `start` can
    /// tell its own run ended even if a restart already happened.
    generation: u64,
}

/// RPC server: listener, live connections and handler registry.
///
/// Handlers may be registered or removed at any time, including while the
/// server runs; they survive `stop` and a later restart.
pub struct RpcServer {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    connections: Arc<ConnectionSet>,
    stats: Arc<ServerStats>,
    policy: Arc<dyn TransportPolicy>,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
}

impl RpcServer {
    /// Build a stopped server.
    ///
    /// `worker_threads` configures the process-wide `may` scheduler and only
    /// takes effect if the scheduler has not started yet.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        may::config().set_workers(config.worker_threads);
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            connections: Arc::new(ConnectionSet::new()),
            stats: Arc::new(ServerStats::new()),
            policy: Arc::new(Passthrough),
            lifecycle: Mutex::new(Lifecycle {
                state: ServerState::Stopped,
                local_addr: None,
                acceptor: None,
                heartbeat: None,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Replace the transport policy used by connections accepted from now on.
    #[must_use]
    pub fn with_transport_policy(mut self, policy: Arc<dyn TransportPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind and start accepting, returning as soon as the listener is up.
    ///
    /// # Errors
    ///
    /// - [`ServerError::AlreadyRunning`] if this instance is starting or running;
    ///   nothing about the running instance changes
    /// - [`ServerError::AddressInUse`] if another listener holds the port
    /// - [`ServerError::Io`] for any other bind or spawn failure
    pub fn async_start(&self) -> Result<(), ServerError> {
        {
            let mut lifecycle = self.lock();
            if lifecycle.state != ServerState::Stopped {
                debug!(state = %lifecycle.state, "Start requested while not stopped");
                return Err(ServerError::AlreadyRunning);
            }
            lifecycle.state = ServerState::Starting;
        }

        match self.launch() {
            Ok((local_addr, acceptor, heartbeat)) => {
                let mut lifecycle = self.lock();
                lifecycle.local_addr = Some(local_addr);
                lifecycle.acceptor = Some(acceptor);
                lifecycle.heartbeat = heartbeat;
                lifecycle.state = ServerState::Running;
                self.changed.notify_all();
                info!(
                    local_addr = %local_addr,
                    handlers = self.registry.len(),
                    heartbeat_ms = self.config.connection_timeout().map(|t| t.as_millis() as u64),
                    "RPC server running"
                );
                Ok(())
            }
            Err(e) => {
                let mut lifecycle = self.lock();
                lifecycle.state = ServerState::Stopped;
                lifecycle.generation += 1;
                self.changed.notify_all();
                warn!(error = %e, "RPC server failed to start");
                Err(e)
            }
        }
    }

    fn launch(
        &self,
    ) -> Result<(SocketAddr, JoinHandle<()>, Option<HeartbeatMonitor>), ServerError> {
        let listener = Listener::bind(self.config.socket_addr()?)?;
        let local_addr = listener.local_addr();

        let ctx = Arc::new(ConnectionContext {
            dispatcher: Dispatcher::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                self.config.stack_size,
            ),
            connections: Arc::clone(&self.connections),
            policy: Arc::clone(&self.policy),
            stats: Arc::clone(&self.stats),
            max_payload_length: self.config.max_payload_length,
            max_pipelined_requests: self.config.max_pipelined_requests,
            stack_size: self.config.stack_size,
        });

        let heartbeat = match self.config.connection_timeout() {
            Some(timeout) => Some(HeartbeatMonitor::spawn(
                timeout,
                Arc::clone(&self.connections),
                Arc::clone(&self.stats),
                self.config.stack_size,
            )?),
            None => None,
        };

        match listener.spawn_acceptor(ctx) {
            Ok(acceptor) => Ok((local_addr, acceptor, heartbeat)),
            Err(e) => {
                if let Some(monitor) = heartbeat {
                    monitor.stop();
                }
                Err(ServerError::Io(e))
            }
        }
    }

    /// Start and block the calling thread until the server is stopped.
    pub fn start(&self) -> Result<(), ServerError> {
        self.async_start()?;
        let mut lifecycle = self.lock();
        let generation = lifecycle.generation;
        while lifecycle.generation == generation {
            lifecycle = self
                .changed
                .wait(lifecycle)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Wait up to `timeout` for the server to reach `Running`.
    pub fn wait_for_start(&self, timeout: Duration) -> bool {
        let lifecycle = self.lock();
        let (lifecycle, _) = self
            .changed
            .wait_timeout_while(lifecycle, timeout, |l| {
                matches!(l.state, ServerState::Starting | ServerState::Stopped)
            })
            .unwrap_or_else(PoisonError::into_inner);
        lifecycle.state == ServerState::Running
    }

    /// Stop accepting, close every connection and cancel the heartbeat sweep.
    ///
    /// Safe to call repeatedly and from several threads at once: one caller
    /// tears down, the rest wait until it is done. A stopped server is left
    /// untouched.
    pub fn stop(&self) {
        let (acceptor, heartbeat) = {
            let mut lifecycle = self.lock();
            loop {
                match lifecycle.state {
                    ServerState::Stopped => return,
                    ServerState::Running => break,
                    ServerState::Starting | ServerState::Stopping => {
                        lifecycle = self
                            .changed
                            .wait(lifecycle)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
            }
            lifecycle.state = ServerState::Stopping;
            (lifecycle.acceptor.take(), lifecycle.heartbeat.take())
        };

        info!("RPC server stopping");
        if let Some(acceptor) = acceptor {
            coroutine::cancel_and_join(acceptor);
        }
        if let Some(monitor) = heartbeat {
            monitor.stop();
        }
        let closed = self.connections.close_all(CloseReason::ServerStopping);

        let mut lifecycle = self.lock();
        lifecycle.state = ServerState::Stopped;
        lifecycle.local_addr = None;
        lifecycle.generation += 1;
        self.changed.notify_all();
        info!(connections_closed = closed, "RPC server stopped");
    }

    /// Register (or replace) a handler. Takes effect for the next lookup on
    /// every connection.
    pub fn register_handler(&self, descriptor: HandlerDescriptor) -> FunctionId {
        let id = descriptor.id();
        self.registry.register(descriptor);
        id
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister_handler(&self, id: FunctionId) -> bool {
        self.registry.unregister(id).is_some()
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }

    /// Address the listener is bound to while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> ServerConfig {
        ServerConfig::new(0).with_host("127.0.0.1")
    }

    #[test]
    fn test_stop_on_fresh_server_is_noop() {
        let server = RpcServer::new(local());
        server.stop();
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!server.wait_for_start(Duration::from_millis(10)));
    }

    #[test]
    fn test_async_start_then_stop() {
        let server = RpcServer::new(local());
        server.async_start().unwrap();
        assert!(server.wait_for_start(Duration::from_secs(1)));
        assert!(server.local_addr().unwrap().port() != 0);
        assert!(matches!(server.async_start(), Err(ServerError::AlreadyRunning)));

        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_handlers_survive_restart() {
        let server = RpcServer::new(local());
        let id = server.register_handler(HandlerDescriptor::immediate("ping", |_| Ok(b"pong".to_vec())));
        server.async_start().unwrap();
        server.stop();
        server.async_start().unwrap();
        assert!(server.registry().contains(id));
        assert!(server.unregister_handler(id));
        assert!(!server.unregister_handler(id));
    }
}
