//! Runtime handler registry.
//!
//! Maps a [`FunctionId`] to the [`HandlerDescriptor`] that serves it. The map
//! lives behind an [`ArcSwap`]: lookups load the current snapshot without
//! locking, and every mutation publishes a fresh copy. A dispatcher therefore
//! sees either the old descriptor or the new one, never a partial update, and
//! an invocation already holding a descriptor runs to completion even if the
//! id is unregistered meanwhile.

use crate::dispatcher::{Request, Responder};
use crate::error::HandlerError;
use crate::protocol::{function_id, FunctionId};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{info, warn};

/// Handler run inline on the connection's reader coroutine.
pub type ImmediateFn = dyn Fn(&Request) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static;

/// Handler run in its own coroutine; answers through the [`Responder`].
pub type DeferredFn = dyn Fn(Request, Responder) + Send + Sync + 'static;

/// How a descriptor is invoked.
#[derive(Clone)]
pub enum Invoker {
    Immediate(Arc<ImmediateFn>),
    Deferred(Arc<DeferredFn>),
}

/// A registered handler: its id, a name for logs, and how to call it.
#[derive(Clone)]
pub struct HandlerDescriptor {
    id: FunctionId,
    name: Arc<str>,
    invoker: Invoker,
}

impl HandlerDescriptor {
    /// Handler whose result is ready as soon as it returns.
    ///
    /// The id is derived from `name` with [`function_id`].
    #[must_use]
    pub fn immediate<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Request) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
    {
        Self {
            id: function_id(name),
            name: Arc::from(name),
            invoker: Invoker::Immediate(Arc::new(f)),
        }
    }

    /// Handler that may suspend before answering.
    ///
    /// The handler owns the [`Responder`] and may hand it to another
    /// coroutine. Dropping it unanswered produces a `handler_failed` response.
    #[must_use]
    pub fn deferred<F>(name: &str, f: F) -> Self
    where
        F: Fn(Request, Responder) + Send + Sync + 'static,
    {
        Self {
            id: function_id(name),
            name: Arc::from(name),
            invoker: Invoker::Deferred(Arc::new(f)),
        }
    }

    /// Member-style handler bound to `receiver`.
    ///
    /// Only a weak reference is kept: once the owning service drops its last
    /// `Arc`, calls fail with `handler_failed` instead of keeping it alive.
    #[must_use]
    pub fn method<S, F>(name: &str, receiver: &Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(&S, &Request) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
    {
        let weak: Weak<S> = Arc::downgrade(receiver);
        let owner: Arc<str> = Arc::from(name);
        Self::immediate(name, move |req| match weak.upgrade() {
            Some(service) => f(&service, req),
            None => Err(receiver_gone(&owner)),
        })
    }

    /// Deferred member-style handler bound to `receiver`.
    #[must_use]
    pub fn deferred_method<S, F>(name: &str, receiver: &Arc<S>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        F: Fn(Arc<S>, Request, Responder) + Send + Sync + 'static,
    {
        let weak: Weak<S> = Arc::downgrade(receiver);
        let owner: Arc<str> = Arc::from(name);
        Self::deferred(name, move |req, responder| match weak.upgrade() {
            Some(service) => f(service, req, responder),
            None => responder.error(receiver_gone(&owner)),
        })
    }

    /// Override the derived id, e.g. to match a peer that numbers functions itself.
    #[must_use]
    pub fn with_id(mut self, id: FunctionId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> FunctionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self.invoker, Invoker::Deferred(_))
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("deferred", &self.is_deferred())
            .finish()
    }
}

fn receiver_gone(name: &str) -> HandlerError {
    HandlerError::new(format!("service backing '{name}' has been dropped"))
}

type HandlerMap = HashMap<FunctionId, Arc<HandlerDescriptor>>;

/// Concurrent id → descriptor map with snapshot reads.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: ArcSwap<HandlerMap>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the descriptor for `descriptor.id()`.
    ///
    /// Returns the descriptor it replaced, if any.
    pub fn register(&self, descriptor: HandlerDescriptor) -> Option<Arc<HandlerDescriptor>> {
        let descriptor = Arc::new(descriptor);
        let mut previous = None;
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            previous = next.insert(descriptor.id(), Arc::clone(&descriptor));
            next
        });

        match &previous {
            Some(old) => warn!(
                function_id = %descriptor.id(),
                handler_name = descriptor.name(),
                replaced = old.name(),
                "Replaced existing handler"
            ),
            None => info!(
                function_id = %descriptor.id(),
                handler_name = descriptor.name(),
                deferred = descriptor.is_deferred(),
                "Handler registered successfully"
            ),
        }
        previous
    }

    /// Remove the descriptor for `id`. In-flight invocations are unaffected.
    pub fn unregister(&self, id: FunctionId) -> Option<Arc<HandlerDescriptor>> {
        let mut removed = None;
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(&id);
            next
        });
        if let Some(old) = &removed {
            info!(function_id = %id, handler_name = old.name(), "Handler unregistered");
        }
        removed
    }

    #[must_use]
    pub fn lookup(&self, id: FunctionId) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.load().get(&id).map(Arc::clone)
    }

    #[must_use]
    pub fn contains(&self, id: FunctionId) -> bool {
        self.handlers.load().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<FunctionId> {
        let mut ids: Vec<_> = self.handlers.load().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.ids())
            .finish()
    }
}
