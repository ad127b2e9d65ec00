//! Shared fixtures for the integration tests: a blocking `std::net` client
//! that speaks the wire protocol, and an RAII server fixture.

#![allow(dead_code)]

use mayrpc::error::ServerError;
use mayrpc::protocol::{
    decode_response_length, decode_response_payload, encode_request, FunctionId, RpcError,
    RpcErrorCode, RpcHeader, RESPONSE_HEADER_LEN,
};
use mayrpc::registry::HandlerDescriptor;
use mayrpc::runtime_config::{ServerConfig, DEFAULT_MAX_PIPELINED};
use mayrpc::server::{RpcServer, TransportPolicy};
use mayrpc::Status;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

/// Ensures May coroutines are configured only once
static MAY_INIT: Once = Once::new();

pub fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x8000);
    });
}

/// Named switches for a test server.
#[derive(Debug, Clone, Copy)]
pub struct TesterConfig {
    /// Start with `async_start`; otherwise run blocking `start` on a thread
    pub async_start: bool,
    /// Enforce the heartbeat with `heartbeat_timeout`
    pub heartbeat: bool,
    pub heartbeat_timeout: Duration,
    /// Per-connection cap on requests queued ahead of the writer
    pub max_pipelined: usize,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            async_start: true,
            heartbeat: false,
            heartbeat_timeout: Duration::from_millis(200),
            max_pipelined: DEFAULT_MAX_PIPELINED,
        }
    }
}

impl TesterConfig {
    pub fn server_config(&self) -> ServerConfig {
        let config = ServerConfig::new(0)
            .with_host("127.0.0.1")
            .with_max_pipelined_requests(self.max_pipelined);
        if self.heartbeat {
            config.with_connection_timeout(Some(self.heartbeat_timeout))
        } else {
            config
        }
    }
}

/// Running server that stops itself when dropped.
pub struct TestServer {
    pub server: Arc<RpcServer>,
    pub addr: SocketAddr,
    blocking: Option<thread::JoinHandle<Result<(), ServerError>>>,
}

impl TestServer {
    pub fn start(tester: TesterConfig, handlers: Vec<HandlerDescriptor>) -> Self {
        Self::start_with(tester, handlers, None)
    }

    pub fn start_with(
        tester: TesterConfig,
        handlers: Vec<HandlerDescriptor>,
        policy: Option<Arc<dyn TransportPolicy>>,
    ) -> Self {
        setup_may_runtime();
        let mut server = RpcServer::new(tester.server_config());
        if let Some(policy) = policy {
            server = server.with_transport_policy(policy);
        }
        for handler in handlers {
            server.register_handler(handler);
        }
        let server = Arc::new(server);

        let blocking = if tester.async_start {
            server.async_start().unwrap();
            None
        } else {
            let s = Arc::clone(&server);
            Some(thread::spawn(move || s.start()))
        };
        assert!(server.wait_for_start(Duration::from_secs(5)), "server did not start");
        let addr = server.local_addr().unwrap();
        Self {
            server,
            addr,
            blocking,
        }
    }

    pub fn client(&self) -> RpcClient {
        RpcClient::connect(self.addr).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(handle) = self.blocking.take() {
            let _ = handle.join();
        }
    }
}

/// Failure of a client call.
#[derive(Debug)]
pub enum CallError {
    /// Transport failed or the server closed the connection
    Io(io::Error),
    /// Well-formed error response
    Rpc(RpcError),
}

impl CallError {
    /// Caller-facing status, for the conditions that have one.
    pub fn status(&self) -> Option<Status> {
        match self {
            CallError::Io(_) => Some(Status::IoError),
            CallError::Rpc(err) if err.code == RpcErrorCode::FunctionNotSupported => {
                Some(Status::FunctionNotSupported)
            }
            CallError::Rpc(_) => None,
        }
    }

    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            CallError::Rpc(err) => Some(err),
            CallError::Io(_) => None,
        }
    }
}

/// Blocking test client speaking the request/response framing.
pub struct RpcClient {
    stream: TcpStream,
    next_seq: u32,
}

impl RpcClient {
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_secs(10)))?;
        Ok(Self {
            stream,
            next_seq: 1,
        })
    }

    /// Write one request without waiting for the response.
    pub fn send(&mut self, function: FunctionId, args: &[u8]) -> io::Result<u32> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stream.write_all(&encode_request(seq, function, args))?;
        Ok(seq)
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Read the next response.
    pub fn recv(&mut self) -> Result<Vec<u8>, CallError> {
        let mut len = [0u8; RESPONSE_HEADER_LEN];
        self.stream.read_exact(&mut len).map_err(CallError::Io)?;
        let mut payload = vec![0u8; decode_response_length(&len) as usize];
        self.stream.read_exact(&mut payload).map_err(CallError::Io)?;
        match decode_response_payload(&payload) {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(err)) => Err(CallError::Rpc(err)),
            Err(e) => Err(CallError::Io(io::Error::new(io::ErrorKind::InvalidData, e))),
        }
    }

    pub fn call(&mut self, function: FunctionId, args: &[u8]) -> Result<Vec<u8>, CallError> {
        self.send(function, args).map_err(CallError::Io)?;
        self.recv()
    }

    /// Whether the server has closed this connection, waiting up to `timeout`.
    pub fn has_closed(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 64];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.stream.set_read_timeout(Some(remaining)).unwrap();
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                // Unread response bytes; keep draining.
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return false
                }
                Err(_) => return true,
            }
        }
    }

    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// A header whose declared length is `length`.
pub fn raw_header(seq: u32, length: u32) -> Vec<u8> {
    RpcHeader::new(seq, length).encode().to_vec()
}

/// Poll `f` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    f()
}
