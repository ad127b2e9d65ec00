//! Pluggable transport behaviour.
//!
//! A [`TransportPolicy`] is consulted before every read and write a
//! connection performs. Production servers use [`Passthrough`]; tests inject
//! faults such as [`FailingWrites`] without any process-wide switches.

use crate::ids::ConnectionId;
use may::net::TcpStream;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hooks run around transport I/O. Returning an error fails that operation
/// exactly as if the socket had reported it.
pub trait TransportPolicy: Send + Sync + 'static {
    fn on_read(&self, _connection: ConnectionId) -> io::Result<()> {
        Ok(())
    }

    fn on_write(&self, _connection: ConnectionId) -> io::Result<()> {
        Ok(())
    }
}

/// Default policy: no interference.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl TransportPolicy for Passthrough {}

/// Fails every write while armed, as if the peer socket had been torn down.
#[derive(Debug, Default)]
pub struct FailingWrites {
    armed: AtomicBool,
}

impl FailingWrites {
    /// A policy that starts out armed.
    #[must_use]
    pub fn armed() -> Self {
        Self {
            armed: AtomicBool::new(true),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl TransportPolicy for FailingWrites {
    fn on_write(&self, _connection: ConnectionId) -> io::Result<()> {
        if self.is_armed() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "injected write failure",
            ));
        }
        Ok(())
    }
}

/// Transport half that routes every operation through a policy.
pub(crate) struct PolicyStream {
    stream: TcpStream,
    policy: Arc<dyn TransportPolicy>,
    connection: ConnectionId,
}

impl PolicyStream {
    pub(crate) fn new(
        stream: TcpStream,
        policy: Arc<dyn TransportPolicy>,
        connection: ConnectionId,
    ) -> Self {
        Self {
            stream,
            policy,
            connection,
        }
    }
}

impl Read for PolicyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.policy.on_read(self.connection)?;
        self.stream.read(buf)
    }
}

impl Write for PolicyStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.policy.on_write(self.connection)?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
