//! Error and status types surfaced by the runtime.
//!
//! Errors are split by blast radius:
//!
//! - [`ServerError`] is returned from lifecycle calls (`start`, `async_start`)
//!   and never affects already-accepted connections.
//! - [`ProtocolError`] is fatal to a single connection only.
//! - [`HandlerError`] is an application-level failure; it is sent back to the
//!   client as an error-tagged response and the connection stays open.

use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Status values reported to callers of the lifecycle and client surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    AlreadyRunning,
    AddressInUse,
    FunctionNotSupported,
    IoError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::AlreadyRunning => "already_running",
            Status::AddressInUse => "address_in_use",
            Status::FunctionNotSupported => "function_not_supported",
            Status::IoError => "io_error",
        };
        f.write_str(s)
    }
}

/// Failure of a server lifecycle call.
#[derive(Debug)]
pub enum ServerError {
    /// `start`/`async_start` was called while the server is starting or running.
    ///
    /// Informational: the running instance and its connections are untouched.
    AlreadyRunning,
    /// The configured address is already bound by another listener.
    AddressInUse(SocketAddr),
    /// Any other bind, resolve or spawn failure.
    Io(io::Error),
}

impl ServerError {
    /// Map this error onto the caller-facing status code.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            ServerError::AlreadyRunning => Status::AlreadyRunning,
            ServerError::AddressInUse(_) => Status::AddressInUse,
            ServerError::Io(_) => Status::IoError,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::AlreadyRunning => write!(f, "server is already running"),
            ServerError::AddressInUse(addr) => write!(f, "address {addr} is already in use"),
            ServerError::Io(err) => write!(f, "server I/O error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::Io(err)
    }
}

/// Framing violation detected while reading a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first header byte did not match the protocol magic number.
    BadMagic {
        /// The byte actually received
        found: u8,
    },
    /// The declared payload cannot hold a function identifier.
    PayloadTooShort {
        /// Declared payload length
        length: u32,
    },
    /// The declared payload exceeds the configured maximum.
    PayloadTooLarge {
        /// Declared payload length
        length: u32,
        /// Configured upper bound
        max: u32,
    },
    /// A response payload was empty or carried an unknown status byte.
    MalformedResponse,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadMagic { found } => {
                write!(f, "bad magic number 0x{found:02x}")
            }
            ProtocolError::PayloadTooShort { length } => {
                write!(f, "payload length {length} is too short for a function id")
            }
            ProtocolError::PayloadTooLarge { length, max } => {
                write!(f, "payload length {length} exceeds maximum {max}")
            }
            ProtocolError::MalformedResponse => write!(f, "malformed response payload"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Application-level handler failure.
///
/// Converted into a `handler_failed` error frame; the connection remains open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_status_mapping() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(ServerError::AlreadyRunning.status(), Status::AlreadyRunning);
        assert_eq!(ServerError::AddressInUse(addr).status(), Status::AddressInUse);
        assert_eq!(
            ServerError::Io(io::Error::other("boom")).status(),
            Status::IoError
        );
    }

    #[test]
    fn test_handler_error_from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("root cause").context("while decoding");
        let handler_err = HandlerError::from(err);
        assert_eq!(handler_err.message(), "while decoding: root cause");
    }

    #[test]
    fn test_status_display_uses_wire_names() {
        assert_eq!(Status::FunctionNotSupported.to_string(), "function_not_supported");
        assert_eq!(Status::IoError.to_string(), "io_error");
    }
}
