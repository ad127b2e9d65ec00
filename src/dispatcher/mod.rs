//! # Dispatcher Module
//!
//! Turns decoded request frames into handler invocations.
//!
//! For every frame the dispatcher looks the function id up in the
//! [`HandlerRegistry`](crate::registry::HandlerRegistry), reserves the
//! connection's next write slot, and invokes the handler:
//!
//! - **Immediate** handlers run inline on the reader coroutine and fill their
//!   slot before the next frame is read.
//! - **Deferred** handlers run on a fresh `may` coroutine and answer through a
//!   [`Responder`] whenever they are done. The reader moves straight on to the
//!   next frame, which is what makes pipelining work.
//!
//! ## Error Handling
//!
//! - Unknown function ids queue a `function_not_supported` frame and close
//!   the connection once it is flushed
//! - Handler errors and panics become `handler_failed` frames; the
//!   connection stays open
//! - A dropped [`Responder`] answers `handler_failed` on its own

mod core;

pub use core::{Dispatched, Dispatcher, Request, Responder};
