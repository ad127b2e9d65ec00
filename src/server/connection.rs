//! Per-client connection state machine.
//!
//! Every accepted socket gets two coroutines:
//!
//! - the **reader** runs the frame state machine below and dispatches each
//!   complete frame, reserving a write slot per request;
//! - the **writer** drains the connection's [`WriteQueue`] to the socket in
//!   reservation order.
//!
//! ```text
//!   AwaitingHeader ──9 bytes──► AwaitingBody ──length bytes──► Dispatching
//!        ▲                                                         │
//!        └─────────────────────────────────────────────────────────┘
//!   any state ──violation / EOF / error / close──► Closing
//! ```
//!
//! Header corruption (bad magic, malformed length) closes the connection at
//! once with no response. An unknown function id queues a final error frame
//! and the writer closes the connection after flushing it.

use crate::coroutine;
use crate::dispatcher::{Dispatched, Dispatcher};
use crate::ids::ConnectionId;
use crate::error::ProtocolError;
use crate::protocol::{split_function_id, RpcHeader, FUNCTION_ID_LEN, REQUEST_HEADER_LEN};
use crate::server::stats::ServerStats;
use crate::server::transport::{PolicyStream, TransportPolicy};
use crate::server::write_queue::{DrainOutcome, WriteQueue, WriteQueueDrain};
use dashmap::DashMap;
use may::net::TcpStream;
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a connection was closed. Recorded once; later close attempts are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The client closed its side.
    PeerClosed,
    /// Bad magic number or malformed length.
    ProtocolViolation,
    /// The client called an unregistered function.
    UnsupportedFunction,
    /// No bytes arrived within the heartbeat timeout.
    HeartbeatTimeout,
    ReadFailed,
    WriteFailed,
    /// The server is stopping.
    ServerStopping,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ProtocolViolation => "protocol_violation",
            CloseReason::UnsupportedFunction => "unsupported_function",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::ReadFailed => "read_failed",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::ServerStopping => "server_stopping",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a connection needs from its server.
pub struct ConnectionContext {
    pub dispatcher: Dispatcher,
    pub connections: Arc<ConnectionSet>,
    pub policy: Arc<dyn TransportPolicy>,
    pub stats: Arc<ServerStats>,
    pub max_payload_length: u32,
    /// Cap on slots reserved ahead of the writer; `0` is unbounded
    pub max_pipelined_requests: usize,
    pub stack_size: usize,
}

/// One accepted client.
///
/// Owned by its reader and writer coroutines; the server's [`ConnectionSet`]
/// only holds a weak reference.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    /// Clone of the socket kept only to shut it down
    transport: Mutex<TcpStream>,
    close_reason: OnceLock<CloseReason>,
    opened_at: Instant,
    /// Milliseconds after `opened_at` when the last byte was received
    last_traffic_ms: AtomicU64,
}

/// Reader state machine.
enum ReadState {
    AwaitingHeader,
    AwaitingBody(RpcHeader),
    Dispatching { header: RpcHeader, payload: Vec<u8> },
    /// `None` leaves teardown to the writer (clean EOF, or a final frame still to flush).
    Closing(Option<CloseReason>),
}

impl Connection {
    fn new(peer_addr: Option<SocketAddr>, transport: TcpStream) -> Self {
        Self {
            id: ConnectionId::next(),
            peer_addr,
            transport: Mutex::new(transport),
            close_reason: OnceLock::new(),
            opened_at: Instant::now(),
            last_traffic_ms: AtomicU64::new(0),
        }
    }

    /// Register `stream` with the server and start its reader and writer.
    pub(crate) fn spawn(
        stream: TcpStream,
        peer_addr: Option<SocketAddr>,
        ctx: &Arc<ConnectionContext>,
    ) -> io::Result<Arc<Connection>> {
        let conn = Arc::new(Connection::new(peer_addr, stream.try_clone()?));
        let write_half = stream.try_clone()?;
        let id = conn.id;
        ctx.connections.insert(&conn);

        let (queue, drain) = WriteQueue::bounded(ctx.max_pipelined_requests);

        let writer = {
            let conn = Arc::clone(&conn);
            let ctx = Arc::clone(ctx);
            move || conn.write_loop(drain, write_half, &ctx)
        };
        if let Err(e) = coroutine::spawn(format!("mayrpc-writer-{id}"), ctx.stack_size, writer) {
            conn.close(CloseReason::WriteFailed);
            ctx.connections.remove(id);
            return Err(e);
        }

        let reader = {
            let conn = Arc::clone(&conn);
            let ctx = Arc::clone(ctx);
            move || conn.read_loop(stream, queue, &ctx)
        };
        if let Err(e) = coroutine::spawn(format!("mayrpc-reader-{id}"), ctx.stack_size, reader) {
            // The dropped closure releases the queue, which lets the writer finish.
            conn.close(CloseReason::ReadFailed);
            return Err(e);
        }

        info!(
            connection_id = %id,
            peer_addr = ?peer_addr,
            "Connection accepted"
        );
        Ok(conn)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_reason.get().is_some()
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Close the connection and shut the socket down in both directions.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.close_with(reason, || {})
    }

    /// Like [`close`](Self::close), running `on_close` once the reason is
    /// recorded but before the peer can observe the shutdown.
    pub fn close_with(&self, reason: CloseReason, on_close: impl FnOnce()) -> bool {
        if self.close_reason.set(reason).is_err() {
            return false;
        }
        on_close();
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = transport.shutdown(Shutdown::Both) {
            // The peer may have reset the socket first.
            debug!(connection_id = %self.id, error = %e, "Socket shutdown failed");
        }
        info!(
            connection_id = %self.id,
            peer_addr = ?self.peer_addr,
            reason = %reason,
            lifetime_ms = self.opened_at.elapsed().as_millis() as u64,
            "Connection closed"
        );
        true
    }

    /// Record received traffic, pushing the heartbeat deadline out.
    pub fn touch(&self) {
        let now = self.opened_at.elapsed().as_millis() as u64;
        self.last_traffic_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last received byte (or since accept, if none yet).
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_traffic_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }

    fn read_loop(&self, stream: TcpStream, mut queue: WriteQueue, ctx: &ConnectionContext) {
        let mut reader = PolicyStream::new(stream, Arc::clone(&ctx.policy), self.id);
        let mut state = ReadState::AwaitingHeader;

        let reason = loop {
            state = match state {
                ReadState::AwaitingHeader => {
                    let mut buf = [0u8; REQUEST_HEADER_LEN];
                    match self.read_full(&mut reader, &mut buf) {
                        Ok(true) => match RpcHeader::decode(&buf) {
                            Ok(header) => ReadState::AwaitingBody(header),
                            Err(e) => self.violation(e),
                        },
                        Ok(false) => ReadState::Closing(None),
                        Err(e) => self.read_failed(e),
                    }
                }
                ReadState::AwaitingBody(header) => match header.payload_len(ctx.max_payload_length) {
                    Ok(len) => {
                        let mut payload = vec![0u8; len];
                        match self.read_full(&mut reader, &mut payload) {
                            Ok(true) => ReadState::Dispatching { header, payload },
                            Ok(false) => ReadState::Closing(Some(CloseReason::PeerClosed)),
                            Err(e) => self.read_failed(e),
                        }
                    }
                    Err(e) => self.violation(e),
                },
                ReadState::Dispatching { header, mut payload } => {
                    match split_function_id(&payload).map(|(id, _)| id) {
                        Ok(function_id) => {
                            let args = payload.split_off(FUNCTION_ID_LEN);
                            let dispatched = ctx.dispatcher.dispatch(
                                self.id,
                                header.seq_num,
                                function_id,
                                args,
                                &mut queue,
                            );
                            match dispatched {
                                Dispatched::Continue => ReadState::AwaitingHeader,
                                Dispatched::CloseAfterFlush | Dispatched::QueueClosed => {
                                    ReadState::Closing(None)
                                }
                            }
                        }
                        Err(e) => self.violation(e),
                    }
                }
                ReadState::Closing(reason) => break reason,
            };
        };

        if let Some(reason) = reason {
            self.close(reason);
        }
        debug!(
            connection_id = %self.id,
            requests = queue.reserved(),
            "Reader finished"
        );
    }

    fn write_loop(&self, drain: WriteQueueDrain, stream: TcpStream, ctx: &ConnectionContext) {
        let sink = PolicyStream::new(stream, Arc::clone(&ctx.policy), self.id);
        let report = drain.run(sink, || self.is_closed());
        ctx.stats.record_written(report.written);

        match report.outcome {
            DrainOutcome::Finished => {
                self.close(CloseReason::PeerClosed);
            }
            DrainOutcome::CloseRequested => {
                self.close(CloseReason::UnsupportedFunction);
            }
            DrainOutcome::Closed { discarded } => {
                if discarded > 0 {
                    debug!(
                        connection_id = %self.id,
                        discarded,
                        "Discarded responses for closed connection"
                    );
                }
            }
            DrainOutcome::WriteFailed { error, discarded } => {
                ctx.stats.record_write_failure();
                warn!(
                    connection_id = %self.id,
                    error = %error,
                    discarded,
                    "Response write failed"
                );
                self.close(CloseReason::WriteFailed);
            }
        }
        ctx.connections.remove(self.id);
    }

    /// Fill `buf` completely. Returns `Ok(false)` on a clean EOF before the first byte.
    fn read_full(&self, reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    filled += n;
                    self.touch();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn violation(&self, err: ProtocolError) -> ReadState {
        warn!(
            connection_id = %self.id,
            peer_addr = ?self.peer_addr,
            error = %err,
            "Protocol violation"
        );
        ReadState::Closing(Some(CloseReason::ProtocolViolation))
    }

    fn read_failed(&self, err: io::Error) -> ReadState {
        if self.is_closed() {
            // Shut down underneath us; the closer already logged why.
            return ReadState::Closing(None);
        }
        debug!(connection_id = %self.id, error = %err, "Read failed");
        ReadState::Closing(Some(CloseReason::ReadFailed))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("close_reason", &self.close_reason())
            .finish()
    }
}

/// Live connections of a server, held weakly.
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: DashMap<ConnectionId, Weak<Connection>>,
}

impl ConnectionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conn: &Arc<Connection>) {
        self.connections.insert(conn.id(), Arc::downgrade(conn));
    }

    pub fn remove(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Open connections, skipping any that closed or were dropped.
    #[must_use]
    pub fn live(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .filter(|conn| !conn.is_closed())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every open connection. Returns how many this call closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.live()
            .into_iter()
            .filter(|conn| conn.close(reason))
            .count()
    }
}
