use crate::coroutine;
use crate::error::HandlerError;
use crate::ids::{ConnectionId, RequestId};
use crate::protocol::{error_frame, success_frame, FunctionId, RpcError};
use crate::registry::{HandlerRegistry, Invoker};
use crate::server::stats::ServerStats;
use crate::server::write_queue::{ResponseSlot, WriteQueue};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// One decoded request as seen by a handler.
#[derive(Debug, Clone)]
pub struct Request {
    pub request_id: RequestId,
    pub connection_id: ConnectionId,
    pub seq_num: u32,
    pub function_id: FunctionId,
    /// Encoded arguments following the function id
    pub args: Vec<u8>,
}

/// Answers one request by filling its write-queue slot.
///
/// Exactly one response is produced per `Responder`: the first call to
/// [`respond`](Self::respond) consumes it, and dropping it unanswered sends a
/// `handler_failed` error so later responses on the connection are not held
/// back forever.
pub struct Responder {
    slot: Option<ResponseSlot>,
    request_id: RequestId,
    handler: Arc<str>,
    started: Instant,
}

impl Responder {
    pub(crate) fn new(slot: ResponseSlot, request_id: RequestId, handler: Arc<str>) -> Self {
        Self {
            slot: Some(slot),
            request_id,
            handler,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn respond(mut self, result: Result<Vec<u8>, HandlerError>) {
        self.complete(result);
    }

    pub fn ok(self, body: impl Into<Vec<u8>>) {
        self.respond(Ok(body.into()));
    }

    pub fn error(self, err: impl Into<HandlerError>) {
        self.respond(Err(err.into()));
    }

    fn complete(&mut self, result: Result<Vec<u8>, HandlerError>) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        let frame = match &result {
            Ok(body) => success_frame(body),
            Err(err) => {
                warn!(
                    request_id = %self.request_id,
                    handler_name = %self.handler,
                    error = %err,
                    "Handler returned an error"
                );
                error_frame(&RpcError::handler_failed(err.message()))
            }
        };
        let delivered = slot.fill(frame);
        debug!(
            request_id = %self.request_id,
            handler_name = %self.handler,
            ok = result.is_ok(),
            delivered,
            execution_time_ms = self.started.elapsed().as_millis() as u64,
            "Handler execution complete"
        );
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.slot.is_some() {
            self.complete(Err(HandlerError::new(
                "handler finished without sending a response",
            )));
        }
    }
}

/// What the read loop should do after a frame was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Keep reading frames.
    Continue,
    /// A final error frame was queued; stop reading and let the writer close.
    CloseAfterFlush,
    /// The writer is gone; the connection is already being torn down.
    QueueClosed,
}

/// Resolves function ids and runs handlers.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    stats: Arc<ServerStats>,
    stack_size: usize,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, stats: Arc<ServerStats>, stack_size: usize) -> Self {
        Self {
            registry,
            stats,
            stack_size,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Dispatch one request frame.
    ///
    /// A write slot is reserved before the handler runs, so the response
    /// keeps its place in line however long the handler takes. Deferred
    /// handlers run on their own coroutine and this call returns at once.
    pub fn dispatch(
        &self,
        connection_id: ConnectionId,
        seq_num: u32,
        function_id: FunctionId,
        args: Vec<u8>,
        queue: &mut WriteQueue,
    ) -> Dispatched {
        let Some(descriptor) = self.registry.lookup(function_id) else {
            self.stats.record_unsupported_function();
            warn!(
                connection_id = %connection_id,
                seq_num,
                function_id = %function_id,
                "Unsupported function requested; closing connection after reply"
            );
            let Ok(slot) = queue.reserve_final(seq_num) else {
                return Dispatched::QueueClosed;
            };
            slot.fill(error_frame(&RpcError::function_not_supported(function_id)));
            return Dispatched::CloseAfterFlush;
        };

        let Ok(slot) = queue.reserve(seq_num) else {
            return Dispatched::QueueClosed;
        };
        self.stats.record_dispatch();

        let request = Request {
            request_id: RequestId::new(),
            connection_id,
            seq_num,
            function_id,
            args,
        };
        let handler_name = descriptor.name_arc();
        let responder = Responder::new(slot, request.request_id, Arc::clone(&handler_name));

        debug!(
            request_id = %request.request_id,
            connection_id = %connection_id,
            seq_num,
            handler_name = %handler_name,
            "Dispatching request"
        );

        match descriptor.invoker() {
            Invoker::Immediate(handler) => {
                let result = catch_unwind(AssertUnwindSafe(|| handler(&request)))
                    .unwrap_or_else(|panic| {
                        Err(handler_panicked(&handler_name, request.request_id, &*panic))
                    });
                responder.respond(result);
            }
            Invoker::Deferred(handler) => {
                let handler = Arc::clone(handler);
                let name = Arc::clone(&handler_name);
                let request_id = request.request_id;
                let spawned = coroutine::spawn(
                    format!("mayrpc-handler-{handler_name}"),
                    self.stack_size,
                    move || {
                        // An unwinding handler drops its Responder, which answers with handler_failed.
                        if let Err(panic) =
                            catch_unwind(AssertUnwindSafe(|| handler(request, responder)))
                        {
                            handler_panicked(&name, request_id, &*panic);
                        }
                    },
                );
                if let Err(e) = spawned {
                    error!(
                        request_id = %request_id,
                        handler_name = %handler_name,
                        error = %e,
                        stack_size = self.stack_size,
                        "Failed to spawn handler coroutine"
                    );
                }
            }
        }
        Dispatched::Continue
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn handler_panicked(handler: &str, request_id: RequestId, panic: &(dyn Any + Send)) -> HandlerError {
    let message = panic_message(panic);
    error!(
        request_id = %request_id,
        handler_name = %handler,
        panic_message = %message,
        "Handler panicked"
    );
    HandlerError::new(format!("handler panicked: {message}"))
}
