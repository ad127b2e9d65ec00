//! # Typed Module
//!
//! serde adapters over the raw-bytes handler interface.
//!
//! Arguments are decoded from the request bytes with `serde_json` and results
//! are encoded back into the success body. A request that fails to decode is
//! answered with `handler_failed`; the connection stays open.
//!
//! ```rust
//! use mayrpc::registry::HandlerDescriptor;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize)]
//! struct Add {
//!     a: i64,
//!     b: i64,
//! }
//!
//! #[derive(Serialize)]
//! struct Sum {
//!     sum: i64,
//! }
//!
//! let add = HandlerDescriptor::typed("add", |req: Add| Ok(Sum { sum: req.a + req.b }));
//! assert_eq!(add.name(), "add");
//! ```

use crate::dispatcher::{Request, Responder};
use crate::error::HandlerError;
use crate::ids::{ConnectionId, RequestId};
use crate::registry::HandlerDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Trait implemented by typed handler services.
pub trait Handler: Send + Sync + 'static {
    /// Argument type, decoded from the request bytes
    type Request: DeserializeOwned + Send + 'static;
    /// Result type, encoded into the success body
    type Response: Serialize + Send + 'static;

    fn handle(&self, req: TypedRequest<Self::Request>) -> Result<Self::Response, HandlerError>;
}

/// Decoded arguments plus the request metadata.
#[derive(Debug, Clone)]
pub struct TypedRequest<T> {
    pub request_id: RequestId,
    pub connection_id: ConnectionId,
    pub seq_num: u32,
    pub data: T,
}

impl<T: DeserializeOwned> TypedRequest<T> {
    pub fn from_request(req: &Request) -> Result<Self, HandlerError> {
        Ok(Self {
            request_id: req.request_id,
            connection_id: req.connection_id,
            seq_num: req.seq_num,
            data: decode_args(&req.args)?,
        })
    }
}

/// Decode request arguments.
pub fn decode_args<T: DeserializeOwned>(args: &[u8]) -> Result<T, HandlerError> {
    serde_json::from_slice(args)
        .map_err(|e| HandlerError::new(format!("invalid arguments: {e}")))
}

/// Encode a handler result into a success body.
pub fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>, HandlerError> {
    serde_json::to_vec(value).map_err(|e| HandlerError::new(format!("failed to encode result: {e}")))
}

/// Encode call arguments on the client side.
pub fn encode_args<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Decode a success body on the client side.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(body)
}

/// [`Responder`] that encodes its value before answering.
pub struct TypedResponder<T> {
    inner: Responder,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> TypedResponder<T> {
    fn new(inner: Responder) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn respond(self, result: Result<T, HandlerError>) {
        self.inner.respond(result.and_then(|value| encode_body(&value)));
    }

    pub fn ok(self, value: T) {
        self.respond(Ok(value));
    }

    pub fn error(self, err: impl Into<HandlerError>) {
        self.inner.error(err);
    }
}

impl HandlerDescriptor {
    /// Immediate handler over typed arguments and result.
    pub fn typed<Req, Res, F>(name: &str, f: F) -> Self
    where
        Req: DeserializeOwned + 'static,
        Res: Serialize + 'static,
        F: Fn(Req) -> Result<Res, HandlerError> + Send + Sync + 'static,
    {
        Self::immediate(name, move |req| {
            let args = decode_args(&req.args)?;
            encode_body(&f(args)?)
        })
    }

    /// Deferred handler over typed arguments; answers through a [`TypedResponder`].
    pub fn typed_deferred<Req, Res, F>(name: &str, f: F) -> Self
    where
        Req: DeserializeOwned + 'static,
        Res: Serialize + 'static,
        F: Fn(Req, TypedResponder<Res>) + Send + Sync + 'static,
    {
        Self::deferred(name, move |req, responder| match decode_args(&req.args) {
            Ok(args) => f(args, TypedResponder::new(responder)),
            Err(e) => responder.error(e),
        })
    }

    /// Register a [`Handler`] implementation.
    pub fn from_handler<H: Handler>(name: &str, handler: H) -> Self {
        let handler = Arc::new(handler);
        Self::immediate(name, move |req| {
            let typed = TypedRequest::from_request(req)?;
            encode_body(&handler.handle(typed)?)
        })
    }
}
