//! Event hooks for application code.
//!
//! Handlers are registered per event name and fired in registration order.
//! Every handler is asynchronous; a plain closure is written as
//! `|payload| async move { ...; Ok(()) }`.

use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Fired after a connection has been added to the registry.
pub const CONNECT: &str = "connect";

/// Fired after a connection has been removed from the registry.
pub const DISCONNECT: &str = "disconnect";

/// Error type returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// A registered event handler.
pub type Handler<P> = Arc<dyn Fn(P) -> HandlerFuture + Send + Sync>;

/// Event dispatch errors.
#[derive(Debug, Error)]
pub enum EventError {
    /// A handler returned an error. Handlers after it were not run.
    #[error("Handler #{index} for `{event}` failed: {source}")]
    Handler {
        /// Event name.
        event: String,
        /// Position of the failing handler in registration order.
        index: usize,
        /// The handler's error.
        #[source]
        source: BoxError,
    },
}

/// Registry of event handlers keyed by event name.
///
/// Meant to be populated during setup. Registering while an `emit` for the
/// same event is in flight does not affect that `emit`.
pub struct EventDispatcher<P> {
    handlers: DashMap<String, Vec<Handler<P>>>,
}

impl<P> EventDispatcher<P>
where
    P: Clone + Send + 'static,
{
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register an async closure for `event`.
    ///
    /// Returns the boxed handler, which can be registered again elsewhere.
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> Handler<P>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: Handler<P> = Arc::new(move |payload: P| -> HandlerFuture {
            Box::pin(handler(payload))
        });
        self.register(event, handler)
    }

    /// Append an already boxed handler to the list for `event`.
    ///
    /// Returns the handler unchanged.
    pub fn register(&self, event: impl Into<String>, handler: Handler<P>) -> Handler<P> {
        let event = event.into();
        trace!(event = %event, "Registering handler");
        self.handlers
            .entry(event)
            .or_default()
            .push(Arc::clone(&handler));
        handler
    }

    /// Run every handler for `event` in registration order.
    ///
    /// Each handler is awaited before the next one starts. Returns the
    /// number of handlers invoked.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure; later handlers are skipped.
    pub async fn emit(&self, event: &str, payload: P) -> Result<usize, EventError> {
        let handlers = match self.handlers.get(event) {
            Some(handlers) => handlers.clone(),
            None => return Ok(0),
        };

        trace!(event = %event, handlers = handlers.len(), "Emitting event");

        for (index, handler) in handlers.iter().enumerate() {
            handler(payload.clone())
                .await
                .map_err(|source| EventError::Handler {
                    event: event.to_string(),
                    index,
                    source,
                })?;
        }

        Ok(handlers.len())
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |h| h.len())
    }
}

impl<P> Default for EventDispatcher<P>
where
    P: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventDispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.handlers {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}
