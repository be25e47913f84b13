//! Events and listener bookkeeping.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// The kinds of event a native object can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A request produced its result.
    Success,
    /// A request or transaction failed.
    Error,
    /// A transaction committed.
    Complete,
    /// A transaction was aborted.
    Abort,
    /// An open or delete request is waiting on other connections.
    Blocked,
    /// An open request needs a schema upgrade.
    UpgradeNeeded,
    /// Another connection wants to change the version.
    VersionChange,
    /// A connection was closed by the engine.
    Close,
}

/// An event as delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventType,
    /// Version before the change, for version events.
    pub old_version: u64,
    /// Version after the change; `None` when the database is being deleted.
    pub new_version: Option<u64>,
}

impl Event {
    /// A plain event with no version information.
    pub fn new(kind: EventType) -> Self {
        Self {
            kind,
            old_version: 0,
            new_version: None,
        }
    }

    /// A version event.
    pub fn version(kind: EventType, old_version: u64, new_version: Option<u64>) -> Self {
        Self {
            kind,
            old_version,
            new_version,
        }
    }
}

/// A listener callback.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Token for removing a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The event capability of a native object.
pub trait EventTarget {
    fn add_listener(&self, kind: EventType, listener: Listener) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
}

/// Listener storage that engines can embed to implement [`EventTarget`].
#[derive(Default)]
pub struct ListenerList {
    next_id: Cell<u64>,
    entries: RefCell<Vec<(ListenerId, EventType, Listener)>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener registered for its kind.
    ///
    /// Listeners may add or remove listeners while running; the set of
    /// recipients is fixed when dispatch starts, except that a listener
    /// removed by an earlier one in the same dispatch is skipped.
    pub fn dispatch(&self, event: &Event) {
        let recipients: Vec<(ListenerId, Listener)> = self
            .entries
            .borrow()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(id, _, l)| (*id, l.clone()))
            .collect();

        for (id, listener) in recipients {
            let still_registered = self.entries.borrow().iter().any(|(i, _, _)| *i == id);
            if still_registered {
                listener(event);
            }
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl EventTarget for ListenerList {
    fn add_listener(&self, kind: EventType, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.entries.borrow_mut().push((id, kind, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.entries.borrow_mut().retain(|(i, _, _)| *i != id);
    }
}
