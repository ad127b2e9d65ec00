//! # mayrpc
//!
//! **mayrpc** is a coroutine-powered binary RPC server runtime built on the
//! [`may`](https://docs.rs/may) stackful-coroutine scheduler.
//!
//! ## Overview
//!
//! Clients open a TCP connection and send framed requests naming a function
//! by numeric id. The server dispatches each frame to a handler registered at
//! runtime and writes the responses back **in request order**, even when
//! handlers finish out of order. Requests may be pipelined: the server keeps
//! reading frames while earlier handlers are still running.
//!
//! ## Architecture
//!
//! - **[`protocol`]** - request/response framing and function ids
//! - **[`registry`]** - concurrent function id → handler map
//! - **[`dispatcher`]** - handler invocation, immediate or on its own coroutine
//! - **[`server`]** - connections, ordered write queues, heartbeat, listener
//!   and the [`RpcServer`](server::RpcServer) lifecycle controller
//! - **[`typed`]** - serde adapters for handlers with structured arguments
//! - **[`runtime_config`]** - server options from the environment or YAML
//! - **[`logging`]** - `tracing` subscriber setup
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Reader as Connection reader
//!     participant Dispatcher
//!     participant Registry
//!     participant Handler
//!     participant Writer as Connection writer
//!
//!     Client->>Reader: header + payload
//!     Reader->>Dispatcher: dispatch(seq, function_id, args)
//!     Dispatcher->>Registry: lookup(function_id)
//!     Registry-->>Dispatcher: HandlerDescriptor
//!     Dispatcher->>Writer: reserve slot (arrival order)
//!     Dispatcher->>Handler: invoke (inline or new coroutine)
//!     Reader->>Client: keeps reading the next frame
//!     Handler-->>Writer: fill slot
//!     Writer->>Client: response frames, in slot order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mayrpc::registry::HandlerDescriptor;
//! use mayrpc::runtime_config::ServerConfig;
//! use mayrpc::server::RpcServer;
//! use std::time::Duration;
//!
//! let server = RpcServer::new(ServerConfig::new(9000));
//! server.register_handler(HandlerDescriptor::immediate("ping", |_| Ok(b"pong".to_vec())));
//! server.register_handler(HandlerDescriptor::deferred("slow", |req, responder| {
//!     may::coroutine::sleep(Duration::from_millis(50));
//!     responder.ok(req.args);
//! }));
//!
//! server.async_start()?;
//! assert!(server.wait_for_start(Duration::from_secs(1)));
//! // ...
//! server.stop();
//! # Ok::<(), mayrpc::error::ServerError>(())
//! ```
//!
//! ## Failure Semantics
//!
//! | Condition                         | Outcome                                      |
//! |-----------------------------------|----------------------------------------------|
//! | Bad magic / malformed length      | connection closed, no response               |
//! | Unknown function id               | `function_not_supported` frame, then close   |
//! | Handler error or panic            | `handler_failed` frame, connection stays open |
//! | No traffic within heartbeat       | connection closed, no response               |
//! | Transport write failure           | connection closed, pending responses dropped |
//!
//! None of these affect other connections or the server itself.
//!
//! ## Runtime Considerations
//!
//! `may` runs a single process-wide scheduler. `worker_threads` is applied
//! when the first [`RpcServer`](server::RpcServer) is built and only takes
//! effect before the scheduler starts. Handlers that wait should suspend
//! through `may` primitives (`may::coroutine::sleep`, `may::sync`) rather than
//! blocking the worker thread.

pub mod cli;
pub mod coroutine;
pub mod dispatcher;
pub mod echo;
pub mod error;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod runtime_config;
pub mod server;
pub mod typed;

pub use dispatcher::{Request, Responder};
pub use error::{HandlerError, ServerError, Status};
pub use protocol::{function_id, FunctionId};
pub use registry::HandlerDescriptor;
pub use runtime_config::ServerConfig;
pub use server::{RpcServer, ServerState};
