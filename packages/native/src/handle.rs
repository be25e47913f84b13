//! The raw handle object model.
//!
//! Every object the engine hands out (databases, transactions, stores,
//! indexes, cursors, requests) implements [`NativeObject`]. Its surface is
//! deliberately dynamic: members are discovered by name through
//! [`NativeObject::property`], and methods come back as unbound
//! [`NativeMethod`] values that must be invoked against a receiver of the
//! right kind.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{EventTarget, EventType, KeyRange, Listener, ListenerId, NativeError, NativeResult, Value};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a native object.
///
/// Ids are allocated from a process-wide counter and never reused, so a
/// stale id can never alias a newer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Allocate a fresh id.
    pub fn allocate() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Factory,
    Database,
    Transaction,
    ObjectStore,
    Index,
    Cursor,
    CursorWithValue,
    Request,
    OpenRequest,
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Factory => "Factory",
            HandleKind::Database => "Database",
            HandleKind::Transaction => "Transaction",
            HandleKind::ObjectStore => "ObjectStore",
            HandleKind::Index => "Index",
            HandleKind::Cursor => "Cursor",
            HandleKind::CursorWithValue => "CursorWithValue",
            HandleKind::Request => "Request",
            HandleKind::OpenRequest => "OpenRequest",
        }
    }

    /// Kind compatibility for method receivers.
    ///
    /// A cursor-with-value is a cursor, and an open request is a request.
    pub fn is_a(&self, other: HandleKind) -> bool {
        *self == other
            || matches!(
                (self, other),
                (HandleKind::CursorWithValue, HandleKind::Cursor)
                    | (HandleKind::OpenRequest, HandleKind::Request)
            )
    }

    pub fn is_cursor(&self) -> bool {
        self.is_a(HandleKind::Cursor)
    }

    pub fn is_request(&self) -> bool {
        self.is_a(HandleKind::Request)
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An object owned by the storage engine.
///
/// Implementations are single-threaded; handles are shared with `Rc`.
pub trait NativeObject {
    /// Stable identity.
    fn id(&self) -> HandleId;

    /// What kind of object this is.
    fn kind(&self) -> HandleKind;

    /// Read a member by name.
    ///
    /// `None` means the object has no such member. Methods are returned as
    /// [`RawValue::Method`].
    fn property(&self, name: &str) -> Option<RawValue>;

    /// Run a method against this object as receiver.
    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue>;

    /// The event capability, for objects that fire events.
    fn events(&self) -> Option<&dyn EventTarget> {
        None
    }

    /// The object's current error, for requests and transactions.
    fn error(&self) -> Option<NativeError> {
        None
    }
}

/// A shared reference to a native object.
#[derive(Clone)]
pub struct RawHandle(Rc<dyn NativeObject>);

impl RawHandle {
    pub fn new(object: Rc<dyn NativeObject>) -> Self {
        RawHandle(object)
    }

    pub fn id(&self) -> HandleId {
        self.0.id()
    }

    pub fn kind(&self) -> HandleKind {
        self.0.kind()
    }

    pub fn property(&self, name: &str) -> Option<RawValue> {
        self.0.property(name)
    }

    /// Membership check: does the object have a member with this name?
    pub fn has_property(&self, name: &str) -> bool {
        self.0.property(name).is_some()
    }

    pub fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        self.0.invoke(method, args)
    }

    pub fn error(&self) -> Option<NativeError> {
        self.0.error()
    }

    /// Register an event listener.
    ///
    /// Returns `None` if the object does not fire events.
    pub fn add_listener(&self, kind: EventType, listener: Listener) -> Option<ListenerId> {
        self.0.events().map(|t| t.add_listener(kind, listener))
    }

    pub fn remove_listener(&self, id: ListenerId) {
        if let Some(target) = self.0.events() {
            target.remove_listener(id);
        }
    }

    /// Object identity, not value equality.
    pub fn ptr_eq(&self, other: &RawHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakRawHandle {
        WeakRawHandle {
            id: self.id(),
            inner: Rc::downgrade(&self.0),
        }
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({}{})", self.kind(), self.id())
    }
}

/// A non-owning reference to a native object.
#[derive(Clone)]
pub struct WeakRawHandle {
    id: HandleId,
    inner: Weak<dyn NativeObject>,
}

impl WeakRawHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn upgrade(&self) -> Option<RawHandle> {
        self.inner.upgrade().map(RawHandle)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakRawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRawHandle({})", self.id)
    }
}

/// An unbound native method.
///
/// Invoking it against anything other than a receiver of the declaring
/// kind fails with `TypeError: Illegal invocation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeMethod {
    kind: HandleKind,
    name: String,
}

impl NativeMethod {
    pub fn new(kind: HandleKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke against `receiver`.
    pub fn call(&self, receiver: &RawValue, args: Vec<RawValue>) -> NativeResult<RawValue> {
        match receiver {
            RawValue::Handle(handle) if handle.kind().is_a(self.kind) => {
                handle.invoke(&self.name, args)
            }
            _ => Err(NativeError::type_error(format!(
                "Illegal invocation of {}.{}",
                self.kind, self.name
            ))),
        }
    }
}

/// Anything the engine can return or accept.
#[derive(Clone, Debug, Default)]
pub enum RawValue {
    /// No value at all.
    #[default]
    Undefined,
    /// Plain data.
    Data(Value),
    /// A key range argument.
    Range(KeyRange),
    /// An error object (e.g. `transaction.error`).
    Error(NativeError),
    /// A native object.
    Handle(RawHandle),
    /// An unbound method.
    Method(NativeMethod),
    /// A list of raw values.
    List(Vec<RawValue>),
}

impl RawValue {
    /// Undefined or null.
    pub fn is_nullish(&self) -> bool {
        matches!(self, RawValue::Undefined | RawValue::Data(Value::Null))
    }

    pub fn as_handle(&self) -> Option<&RawHandle> {
        match self {
            RawValue::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RawValue::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl From<Value> for RawValue {
    fn from(v: Value) -> Self {
        RawValue::Data(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Data(Value::from(v))
    }
}

impl From<KeyRange> for RawValue {
    fn from(v: KeyRange) -> Self {
        RawValue::Range(v)
    }
}

impl From<RawHandle> for RawValue {
    fn from(v: RawHandle) -> Self {
        RawValue::Handle(v)
    }
}
