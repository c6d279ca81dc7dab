//! Event handler registry and dispatch.
//!
//! Handlers are keyed by event name, with a separate ordered list of
//! "any event" observers. Delivery runs on a dedicated task fed by a queue:
//! decoding the next frame never waits on user code, and a panicking
//! handler is contained at the dispatch boundary.

use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, trace};

use tether_protocol::Value;

/// Reserved lifecycle event names.
pub mod lifecycle {
    /// Session reached Connected.
    pub const CONNECT: &str = "connect";
    /// Session closed; the single argument is the reason string.
    pub const DISCONNECT: &str = "disconnect";
    /// A connection attempt failed; arguments are the attempt number and
    /// the error text.
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    /// Non-fatal session error; the single argument is the error text.
    pub const ERROR: &str = "error";
}

/// A delivered event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name; either a remote event or a reserved lifecycle name.
    pub name: String,
    /// Positional arguments, binary buffers already resolved.
    pub args: Vec<Value>,
}

impl Event {
    /// Build an event.
    #[must_use]
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Event callback.
pub type Callback = Arc<dyn Fn(Event) + Send + Sync>;

/// Name-keyed handler table plus the ordered any-event observer list.
///
/// Instance-owned: every client carries its own registry, never a
/// process-wide one.
#[derive(Default)]
pub struct HandlerRegistry {
    named: DashMap<String, Vec<Callback>>,
    any: RwLock<Vec<Callback>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event name.
    pub fn on(&self, name: impl Into<String>, callback: Callback) {
        self.named.entry(name.into()).or_default().push(callback);
    }

    /// Register an observer invoked for every event, after the named
    /// handlers, in registration order.
    pub fn on_any(&self, callback: Callback) {
        self.any
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(callback);
    }

    fn handlers_for(&self, name: &str) -> Vec<Callback> {
        let mut callbacks = self
            .named
            .get(name)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        callbacks.extend(
            self.any
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        callbacks
    }
}

/// Handle to the dispatch task; cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Event>,
}

impl Dispatcher {
    /// Spawn the dispatch task for a registry.
    #[must_use]
    pub fn spawn(registry: Arc<HandlerRegistry>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!(event = %event.name, args = event.args.len(), "Dispatching event");
                for callback in registry.handlers_for(&event.name) {
                    let event = event.clone();
                    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                        error!("Event handler panicked; dispatch continues");
                    }
                }
            }
        });

        Self { tx }
    }

    /// Queue an event for delivery. Never blocks the caller.
    pub fn dispatch(&self, event: Event) {
        // The dispatch task lives as long as the client; a send failure only
        // happens during teardown and the event is dropped with it.
        let _ = self.tx.send(event);
    }
}
