//! Typed dispatch of server-pushed events.
//!
//! Handlers are registered per [`EventKind`] while building the dispatcher;
//! the table is fixed afterwards. Unrecognized event names never reach this
//! layer: the connection logs and drops them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use schemalink_transport_traits::{EventKind, ServerEvent};

/// Callback invoked for a server event.
pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// Immutable `EventKind` → handlers table.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (kind.name(), handlers.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &counts)
            .finish()
    }
}

impl EventDispatcher {
    /// Start building a dispatcher
    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::default()
    }

    /// Invokes every handler registered for the event's kind, in
    /// registration order. Returns the number of handlers run.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind) else {
            trace!(event = %event.kind, "No handlers registered");
            return 0;
        };

        for handler in handlers {
            handler(event);
        }
        trace!(event = %event.kind, handlers = handlers.len(), "Event dispatched");
        handlers.len()
    }

    /// Handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Whether no handler is registered at all
    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }
}

/// Builder for [`EventDispatcher`]
#[derive(Default)]
pub struct EventDispatcherBuilder {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
}

impl fmt::Debug for EventDispatcherBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcherBuilder")
            .field("kinds", &self.handlers.len())
            .finish()
    }
}

impl EventDispatcherBuilder {
    /// Register `handler` for events of `kind`
    #[must_use]
    pub fn on<F>(self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.on_shared(kind, Arc::new(handler))
    }

    /// Register an already shared handler for events of `kind`
    #[must_use]
    pub fn on_shared(mut self, kind: EventKind, handler: EventHandler) -> Self {
        debug!(event = %kind, "Registering event handler");
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    /// Register `handler` for every event kind
    #[must_use]
    pub fn on_any<F>(self, handler: F) -> Self
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        EventKind::ALL
            .iter()
            .fold(self, |builder, kind| builder.on_shared(*kind, handler.clone()))
    }

    /// Freeze the table
    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            handlers: self.handlers,
        }
    }
}
