//! # Node Events
//!
//! Notifications fired after a mutation has been applied in memory.
//!
//! Listeners receive the event record only. They have no handle on the
//! store, so dispatch never re-enters it.

use crate::registry::NodeKind;
use crate::types::Oid;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    NodeAdd,
    NodeRemove,
    NodeUpdate,
    NodeRelocate,
    NodeAssociate,
    NodeDisassociate,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::NodeAdd => "node add",
            EventKind::NodeRemove => "node remove",
            EventKind::NodeUpdate => "node update",
            EventKind::NodeRelocate => "node relocate",
            EventKind::NodeAssociate => "node associate",
            EventKind::NodeDisassociate => "node disassociate",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fired event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: EventKind,
    pub oid: Oid,
    pub class: NodeKind,
    /// The other side of an association, or the new parent on relocation.
    pub other: Option<Oid>,
}

type Listener = Box<dyn FnMut(&NodeEvent) + Send + Sync>;

/// Synchronous fan-out to registered listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&NodeEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&mut self, kind: EventKind, oid: Oid, class: NodeKind, other: Option<Oid>) {
        let event = NodeEvent {
            kind,
            oid,
            class,
            other,
        };
        debug!(event = %kind, oid = %oid, class = %class, "event");
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn listeners_see_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut bus = EventBus::new();
        bus.subscribe(move |e: &NodeEvent| {
            if let Ok(mut v) = sink.lock() {
                v.push(e.kind);
            }
        });

        bus.emit(EventKind::NodeAdd, Oid(1), NodeKind::Device, None);
        bus.emit(EventKind::NodeAssociate, Oid(1), NodeKind::Device, Some(Oid(2)));

        let seen = seen.lock().expect("lock");
        assert_eq!(*seen, vec![EventKind::NodeAdd, EventKind::NodeAssociate]);
    }
}
