use crate::coroutine;
use crate::error::ServerError;
use crate::server::connection::{Connection, ConnectionContext};
use may::coroutine::JoinHandle;
use may::net::TcpListener;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// A bound listening socket, not yet accepting.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `addr`, reporting an occupied port as [`ServerError::AddressInUse`].
    pub fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let inner = TcpListener::bind(addr).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => ServerError::AddressInUse(addr),
            _ => ServerError::Io(e),
        })?;
        let local_addr = inner.local_addr()?;
        Ok(Self { inner, local_addr })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop on its own coroutine.
    ///
    /// The loop only ends by cancellation; the listening socket is closed when
    /// the cancelled coroutine unwinds.
    pub fn spawn_acceptor(self, ctx: Arc<ConnectionContext>) -> io::Result<JoinHandle<()>> {
        let stack_size = ctx.stack_size;
        coroutine::spawn("mayrpc-acceptor".to_string(), stack_size, move || {
            info!(local_addr = %self.local_addr, "Accepting connections");
            for stream in self.inner.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        may::coroutine::sleep(ACCEPT_BACKOFF);
                        continue;
                    }
                };
                ctx.stats.record_accept();
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                let peer_addr = stream.peer_addr().ok();
                if let Err(e) = Connection::spawn(stream, peer_addr, &ctx) {
                    error!(peer_addr = ?peer_addr, error = %e, "Failed to start connection");
                }
            }
        })
    }
}
