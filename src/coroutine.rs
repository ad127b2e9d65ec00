//! Thin wrapper around `may` coroutine spawning.
//!
//! All coroutines the runtime creates (acceptor, heartbeat sweep, connection
//! reader/writer, deferred handlers) go through [`spawn`] so stack sizing and
//! naming stay uniform.

use may::coroutine::{self, JoinHandle};
use std::io;

/// Spawn a named coroutine with an explicit stack size.
///
/// # Errors
///
/// Returns the runtime's error if the coroutine could not be created
/// (typically stack allocation failure under memory pressure).
pub fn spawn<F, T>(name: String, stack_size: usize, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
    // The unsafety comes from the coroutine runtime's requirements, not from this function's logic.
    // Closures are Send + 'static and never hold thread-local state across
    // suspension points, which is what the runtime requires.
    unsafe {
        coroutine::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn(f)
    }
}

/// Cancel a coroutine and wait for it to unwind.
///
/// Used for coroutines parked in blocking I/O (the accept loop) that have no
/// other way to observe shutdown.
pub fn cancel_and_join<T>(handle: JoinHandle<T>) {
    // SAFETY: may::Coroutine::cancel() is marked unsafe by the may runtime.
    // This is safe because:
    // - The coroutine handle is valid (we own it)
    // - Cancellation is the intended behavior during shutdown
    // - The cancelled coroutine only owns resources released by unwinding
    unsafe {
        handle.coroutine().cancel();
    }
    let _ = handle.join();
}
