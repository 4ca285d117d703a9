//! Event notification.
//!
//! The engine names an event, its target and its payload; hosts observe events by
//! registering handlers with [`Environment::on`]. Handlers run on the engine's
//! thread with full access to the environment, so they can issue new requests the
//! way a page script would from inside an `onsuccess` callback.

use std::collections::HashMap;

use log::trace;

use crate::env::Environment;
use crate::error::Error;
use crate::types::{ConnectionId, RequestId, TransactionId};
use crate::value::HostValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    VersionChange,
    Blocked,
    UpgradeNeeded,
    Success,
    Error,
    Abort,
    Complete,
    Close,
}

impl EventKind {
    /// DOM event type
    pub fn name(self) -> &'static str {
        match self {
            EventKind::VersionChange => "versionchange",
            EventKind::Blocked => "blocked",
            EventKind::UpgradeNeeded => "upgradeneeded",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::Abort => "abort",
            EventKind::Complete => "complete",
            EventKind::Close => "close",
        }
    }

    /// Whether the event propagates from a request to its transaction and connection
    pub fn bubbles(self) -> bool {
        matches!(self, EventKind::Error | EventKind::Abort)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Request(RequestId),
    Transaction(TransactionId),
    Connection(ConnectionId),
}

/// A dispatched notification
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Where the event was fired
    pub target: EventTarget,
    /// Version change payload
    pub old_version: Option<u64>,
    pub new_version: Option<u64>,
    /// Error carried by "error" and "abort" events
    pub error: Option<Error>,
}

impl Event {
    pub fn new(kind: EventKind, target: EventTarget) -> Self {
        Event {
            kind,
            target,
            old_version: None,
            new_version: None,
            error: None,
        }
    }

    /// Version change event; `new_version` is `None` for deletions
    pub fn version_change(kind: EventKind, target: EventTarget, old_version: u64, new_version: Option<u64>) -> Self {
        Event {
            old_version: Some(old_version),
            new_version,
            ..Event::new(kind, target)
        }
    }

    pub fn with_error(mut self, error: Option<Error>) -> Self {
        self.error = error;
        self
    }
}

pub(crate) type Handler<V> = Box<dyn FnMut(&mut Environment<V>, &Event)>;

/// Registered handlers by target and kind
pub(crate) struct EventHandlers<V> {
    handlers: HashMap<(EventTarget, EventKind), Vec<Handler<V>>>,
}

impl<V> EventHandlers<V> {
    pub(crate) fn new() -> Self {
        EventHandlers {
            handlers: HashMap::new(),
        }
    }

    fn add(&mut self, target: EventTarget, kind: EventKind, handler: Handler<V>) {
        self.handlers.entry((target, kind)).or_default().push(handler);
    }

    fn take(&mut self, target: EventTarget, kind: EventKind) -> Option<Vec<Handler<V>>> {
        self.handlers.remove(&(target, kind))
    }

    /// Put handlers back after a dispatch, behind any registered while it ran
    fn restore(&mut self, target: EventTarget, kind: EventKind, mut handlers: Vec<Handler<V>>) {
        if let Some(added) = self.handlers.remove(&(target, kind)) {
            handlers.extend(added);
        }
        self.handlers.insert((target, kind), handlers);
    }

    pub(crate) fn remove_target(&mut self, target: EventTarget) {
        self.handlers.retain(|(t, _), _| *t != target);
    }

    /// Number of registered handlers
    pub(crate) fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

impl<V: HostValue> Environment<V> {
    /// Register a handler for events of `kind` at `target`. Bubbling events also
    /// reach handlers registered on the transaction and connection of the request
    /// they were fired at.
    pub fn on<F>(&mut self, target: EventTarget, kind: EventKind, handler: F)
    where
        F: FnMut(&mut Environment<V>, &Event) + 'static,
    {
        self.handlers.add(target, kind, Box::new(handler));
    }

    /// Drop every handler registered at `target`
    pub fn off(&mut self, target: EventTarget) {
        self.handlers.remove_target(target);
    }

    /// Events dispatched since the last call, when event recording is on
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.event_log)
    }

    fn event_path(&self, target: EventTarget) -> Vec<EventTarget> {
        let mut path = vec![target];
        let transaction = match target {
            EventTarget::Request(id) => {
                let transaction = self.requests.get(id).and_then(|request| request.transaction);
                if let Some(txn) = transaction {
                    path.push(EventTarget::Transaction(txn));
                }
                transaction
            }
            EventTarget::Transaction(id) => Some(id),
            EventTarget::Connection(_) => None,
        };
        if let Some(txn) = transaction.and_then(|id| self.transactions.get(id)) {
            path.push(EventTarget::Connection(txn.connection));
        }
        path
    }

    /// Deliver an event to its target, then up the path for bubbling kinds
    pub(crate) fn dispatch(&mut self, event: Event) {
        trace!("dispatch {} at {:?}", event.kind.name(), event.target);
        if self.record_events {
            self.event_log.push(event.clone());
        }

        let path = if event.kind.bubbles() {
            self.event_path(event.target)
        } else {
            vec![event.target]
        };

        for target in path {
            let Some(mut handlers) = self.handlers.take(target, event.kind) else {
                continue;
            };
            for handler in handlers.iter_mut() {
                handler(self, &event);
            }
            self.handlers.restore(target, event.kind, handlers);
        }
    }
}
