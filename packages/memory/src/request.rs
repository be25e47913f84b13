//! Requests: the engine's one-shot result carriers.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use awaitdb_native::{
    Event, EventTarget, EventType, HandleId, HandleKind, ListenerList, NativeError, NativeObject,
    NativeResult, RawHandle, RawValue, Value,
};

use crate::Transaction;

/// A pending or completed operation.
///
/// Cursor requests are reused: every cursor advance puts the same request
/// back into the pending state and fires `success` on it again.
pub struct Request {
    id: HandleId,
    kind: HandleKind,
    source: Option<RawHandle>,
    transaction: RefCell<Option<Rc<Transaction>>>,
    done: Cell<bool>,
    result: RefCell<RawValue>,
    error: RefCell<Option<NativeError>>,
    listeners: ListenerList,
}

impl Request {
    pub(crate) fn new(source: Option<RawHandle>, transaction: Option<Rc<Transaction>>) -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::allocate(),
            kind: HandleKind::Request,
            source,
            transaction: RefCell::new(transaction),
            done: Cell::new(false),
            result: RefCell::new(RawValue::Undefined),
            error: RefCell::new(None),
            listeners: ListenerList::new(),
        })
    }

    /// A request returned by `open` or `deleteDatabase`.
    pub(crate) fn open() -> Rc<Self> {
        Rc::new(Self {
            id: HandleId::allocate(),
            kind: HandleKind::OpenRequest,
            source: None,
            transaction: RefCell::new(None),
            done: Cell::new(false),
            result: RefCell::new(RawValue::Undefined),
            error: RefCell::new(None),
            listeners: ListenerList::new(),
        })
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RawHandle {
        RawHandle::new(self.clone())
    }

    /// Put a finished request back into the pending state.
    pub(crate) fn reset(&self) {
        self.done.set(false);
    }

    pub(crate) fn set_transaction(&self, transaction: Option<Rc<Transaction>>) {
        *self.transaction.borrow_mut() = transaction;
    }

    /// Make a result readable without firing anything, as `upgradeneeded`
    /// needs.
    pub(crate) fn set_result(&self, result: RawValue) {
        self.done.set(true);
        *self.result.borrow_mut() = result;
    }

    pub(crate) fn succeed(&self, result: RawValue) {
        self.done.set(true);
        *self.error.borrow_mut() = None;
        *self.result.borrow_mut() = result;
        self.listeners.dispatch(&Event::new(EventType::Success));
    }

    pub(crate) fn fail(&self, error: NativeError) {
        self.done.set(true);
        *self.result.borrow_mut() = RawValue::Undefined;
        *self.error.borrow_mut() = Some(error);
        self.listeners.dispatch(&Event::new(EventType::Error));
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        self.listeners.dispatch(event);
    }
}

impl NativeObject for Request {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        self.kind
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        match name {
            "result" => Some(if self.done.get() {
                self.result.borrow().clone()
            } else {
                RawValue::Undefined
            }),
            "error" => Some(match self.error.borrow().clone() {
                Some(e) => RawValue::Error(e),
                None => RawValue::Data(Value::Null),
            }),
            "readyState" => Some(RawValue::from(if self.done.get() { "done" } else { "pending" })),
            "source" => Some(match &self.source {
                Some(h) => RawValue::Handle(h.clone()),
                None => RawValue::Data(Value::Null),
            }),
            "transaction" => Some(match self.transaction.borrow().as_ref() {
                Some(tx) => RawValue::Handle(tx.handle()),
                None => RawValue::Data(Value::Null),
            }),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, _args: Vec<RawValue>) -> NativeResult<RawValue> {
        Err(NativeError::type_error(format!(
            "{}.{} is not a function",
            self.kind, method
        )))
    }

    fn events(&self) -> Option<&dyn EventTarget> {
        Some(&self.listeners)
    }

    fn error(&self) -> Option<NativeError> {
        self.error.borrow().clone()
    }
}
