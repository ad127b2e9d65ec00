//! Built-in demo handlers served by the `mayrpc-server` binary.
//!
//! - `ping`: replies `pong`
//! - `echo`: replies with its raw argument bytes
//! - `echo_delayed`: typed; sleeps `delay_ms` on its own coroutine, then
//!   replies with `payload`

use crate::protocol::FunctionId;
use crate::registry::HandlerDescriptor;
use crate::server::RpcServer;
use crate::typed::TypedResponder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Arguments of `echo_delayed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedEcho {
    pub delay_ms: u64,
    pub payload: String,
}

#[must_use]
pub fn ping() -> HandlerDescriptor {
    HandlerDescriptor::immediate("ping", |_| Ok(b"pong".to_vec()))
}

#[must_use]
pub fn echo() -> HandlerDescriptor {
    HandlerDescriptor::immediate("echo", |req| Ok(req.args.clone()))
}

#[must_use]
pub fn echo_delayed() -> HandlerDescriptor {
    HandlerDescriptor::typed_deferred("echo_delayed", |args: DelayedEcho, responder: TypedResponder<String>| {
        may::coroutine::sleep(Duration::from_millis(args.delay_ms));
        responder.ok(args.payload);
    })
}

/// Every built-in handler.
#[must_use]
pub fn builtin_handlers() -> Vec<HandlerDescriptor> {
    vec![ping(), echo(), echo_delayed()]
}

/// Register the built-in handlers on `server`.
pub fn register_builtin(server: &RpcServer) -> Vec<FunctionId> {
    builtin_handlers()
        .into_iter()
        .map(|desc| server.register_handler(desc))
        .collect()
}
