//! # Runtime Configuration Module
//!
//! Server construction options, loadable from environment variables or a
//! YAML file.
//!
//! ## Environment Variables
//!
//! | Variable                 | Field                   | Default            |
//! |--------------------------|-------------------------|--------------------|
//! | `MAYRPC_HOST`            | `host`                  | `0.0.0.0`          |
//! | `MAYRPC_PORT`            | `port`                  | `9000`             |
//! | `MAYRPC_WORKERS`         | `worker_threads`        | available cores    |
//! | `MAYRPC_CONN_TIMEOUT_MS` | `connection_timeout_ms` | unset (no heartbeat) |
//! | `MAYRPC_MAX_PAYLOAD`     | `max_payload_length`    | 16 MiB             |
//! | `MAYRPC_STACK_SIZE`      | `stack_size`            | `0x10000` (64 KB)  |
//! | `MAYRPC_MAX_PIPELINED`   | `max_pipelined_requests` | `1024` (`0` = unbounded) |
//!
//! `MAYRPC_STACK_SIZE` accepts decimal (`65536`) or hexadecimal (`0x10000`).
//!
//! ## YAML
//!
//! ```yaml
//! port: 9000
//! worker_threads: 4
//! connection_timeout_ms: 30000
//! ```
//!
//! Missing keys fall back to their defaults.
//!
//! ## Stack size
//!
//! Every connection runs two coroutines (reader and writer) and every
//! deferred handler invocation runs one more. Total virtual memory is roughly
//! `stack_size × live coroutines`; raise it for handlers with deep call chains.

use crate::protocol::DEFAULT_MAX_PAYLOAD_LENGTH;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Default coroutine stack size (64 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Default cap on unanswered requests per connection.
pub const DEFAULT_MAX_PIPELINED: usize = 1024;

/// Options recognised at server construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port
    pub port: u16,
    /// Scheduler worker threads for the `may` runtime
    pub worker_threads: usize,
    /// Heartbeat timeout in milliseconds; absent or `0` disables it
    pub connection_timeout_ms: Option<u64>,
    /// Largest accepted request payload in bytes
    pub max_payload_length: u32,
    /// Stack size for connection and handler coroutines
    pub stack_size: usize,
    /// Requests a connection may have queued ahead of the writer before the
    /// server stops reading from it; `0` removes the cap
    pub max_pipelined_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            worker_threads: default_workers(),
            connection_timeout_ms: None,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            stack_size: DEFAULT_STACK_SIZE,
            max_pipelined_requests: DEFAULT_MAX_PIPELINED,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Parse a size given in decimal or `0x`-prefixed hexadecimal.
#[must_use]
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

impl ServerConfig {
    /// Defaults bound to `port` on every interface.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = env::var("MAYRPC_HOST") {
            config.host = host;
        }
        if let Some(port) = env::var("MAYRPC_PORT").ok().and_then(|s| s.parse().ok()) {
            config.port = port;
        }
        if let Some(workers) = env::var("MAYRPC_WORKERS").ok().and_then(|s| s.parse().ok()) {
            config.worker_threads = workers;
        }
        if let Some(ms) = env::var("MAYRPC_CONN_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.connection_timeout_ms = Some(ms);
        }
        if let Some(max) = env::var("MAYRPC_MAX_PAYLOAD")
            .ok()
            .and_then(|s| parse_size(&s))
            .and_then(|n| u32::try_from(n).ok())
        {
            config.max_payload_length = max;
        }
        if let Some(size) = env::var("MAYRPC_STACK_SIZE").ok().and_then(|s| parse_size(&s)) {
            config.stack_size = size;
        }
        if let Some(max) = env::var("MAYRPC_MAX_PIPELINED")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_pipelined_requests = max;
        }
        config
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Enable heartbeat enforcement; `None` or a zero duration disables it.
    ///
    /// Sub-millisecond timeouts round up to 1 ms rather than down to zero.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout_ms = timeout.map(|t| {
            let ms = t.as_micros().div_ceil(1000);
            u64::try_from(ms).unwrap_or(u64::MAX)
        });
        self
    }

    #[must_use]
    pub fn with_max_payload_length(mut self, max: u32) -> Self {
        self.max_payload_length = max;
        self
    }

    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    #[must_use]
    pub fn with_max_pipelined_requests(mut self, max: usize) -> Self {
        self.max_pipelined_requests = max;
        self
    }

    /// Heartbeat timeout, if enforcement is enabled.
    #[must_use]
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Resolve `host:port` to the address the listener binds.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("could not resolve {}:{}", self.host, self.port),
                )
            })
    }
}
