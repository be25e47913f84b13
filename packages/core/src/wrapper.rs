//! Wrapping and unwrapping values crossing the boundary.

use std::rc::Rc;

use awaitdb_native::{HandleKind, RawHandle, RawValue};
use tracing::{debug, trace};

use crate::adapter;
use crate::cache::IdentityCache;
use crate::hooks::HookSet;
use crate::{Error, Handle, Promise, Registry, Result, Wrapped};

struct WrapperInner {
    cache: IdentityCache,
    hooks: Rc<dyn HookSet>,
}

/// Turns raw values into wrapped ones and back.
///
/// A wrapper owns an identity cache and a frozen hook chain. Wrapping the
/// same raw object twice yields the same [`Handle`] for as long as that
/// handle is alive, and [`Wrapper::unwrap`] maps any handle or request
/// future it produced back to its raw object.
///
/// ```rust
/// use awaitdb_core::{Registry, Wrapped, Wrapper};
/// use awaitdb_native::{RawValue, Value};
///
/// let wrapper = Wrapper::new(Registry::new());
/// let wrapped = wrapper.wrap(RawValue::Data(Value::from(5)));
/// assert_eq!(wrapped.as_value(), Some(&Value::from(5)));
/// ```
#[derive(Clone)]
pub struct Wrapper(Rc<WrapperInner>);

impl Wrapper {
    /// Freeze `registry` into a new wrapper.
    pub fn new(registry: Registry) -> Self {
        Wrapper(Rc::new(WrapperInner {
            cache: IdentityCache::default(),
            hooks: registry.freeze(),
        }))
    }

    /// Head of the hook chain.
    pub fn hooks(&self) -> &Rc<dyn HookSet> {
        &self.0.hooks
    }

    pub(crate) fn cache(&self) -> &IdentityCache {
        &self.0.cache
    }

    pub fn ptr_eq(&self, other: &Wrapper) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn wrap(&self, raw: RawValue) -> Wrapped {
        match raw {
            RawValue::Undefined => Wrapped::Undefined,
            RawValue::Data(v) => Wrapped::Data(v),
            RawValue::Range(r) => Wrapped::Range(r),
            RawValue::Error(e) => Wrapped::Error(e),
            RawValue::Method(m) => Wrapped::Method(self.cache().method(m)),
            RawValue::List(items) => Wrapped::List(items.into_iter().map(|r| self.wrap(r)).collect()),
            RawValue::Handle(h) => self.wrap_handle(h),
        }
    }

    pub fn wrap_handle(&self, raw: RawHandle) -> Wrapped {
        // Requests can settle more than once (cursors), so each wrap is a
        // fresh future and never the canonical wrapper.
        if raw.kind().is_request() {
            return Wrapped::Future(adapter::request_future(self, &raw));
        }
        if let Some(handle) = self.cache().lookup(&raw) {
            trace!(?handle, "identity cache hit");
            return Wrapped::Handle(handle);
        }
        if !is_proxyable(raw.kind()) {
            return Wrapped::Raw(raw);
        }
        if raw.kind() == HandleKind::Transaction {
            self.completion(&raw);
        }
        let handle = Handle::new(raw, self.clone());
        self.cache().insert(&handle);
        debug!(?handle, "wrapped");
        Wrapped::Handle(handle)
    }

    /// The raw value behind `wrapped`.
    ///
    /// `None` for handles and futures this wrapper did not produce, and
    /// for values with no raw counterpart (hook methods, sequences,
    /// completion futures).
    pub fn unwrap(&self, wrapped: &Wrapped) -> Option<RawValue> {
        Some(match wrapped {
            Wrapped::Undefined => RawValue::Undefined,
            Wrapped::Data(v) => RawValue::Data(v.clone()),
            Wrapped::Range(r) => RawValue::Range(r.clone()),
            Wrapped::Error(e) => RawValue::Error(e.clone()),
            Wrapped::Raw(h) => RawValue::Handle(h.clone()),
            Wrapped::Handle(h) => RawValue::Handle(self.cache().raw_for(h.id())?),
            Wrapped::Future(p) => RawValue::Handle(self.cache().raw_for(p.id())?),
            Wrapped::Method(m) => RawValue::Method(m.as_native()?.clone()),
            Wrapped::List(items) => RawValue::List(
                items
                    .iter()
                    .map(|w| self.unwrap(w))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Wrapped::Sequence(_) => return None,
        })
    }

    /// [`Wrapper::unwrap`] for arguments headed to the engine.
    pub(crate) fn unwrap_arg(&self, wrapped: &Wrapped) -> Result<RawValue> {
        self.unwrap(wrapped).ok_or(Error::Unwrappable(match wrapped {
            Wrapped::Handle(_) => "a handle from another wrapper",
            Wrapped::Future(_) => "a future with no request behind it",
            Wrapped::Method(_) => "an adapter method",
            Wrapped::Sequence(_) => "a cursor sequence",
            _ => "a list holding an adapter-only value",
        }))
    }

    /// The transaction's completion future, created once.
    pub fn completion(&self, transaction: &RawHandle) -> Promise {
        self.cache()
            .completion(transaction, || adapter::completion_future(transaction))
    }

    /// A fresh future for the next step of `cursor`.
    pub(crate) fn cursor_step(&self, cursor: &RawHandle) -> Wrapped {
        let request = self.cache().cursor_request(cursor).or_else(|| {
            cursor
                .property("request")
                .and_then(|r| r.as_handle().cloned())
        });
        match request {
            Some(request) => self.wrap_handle(request),
            None => Wrapped::Undefined,
        }
    }
}

fn is_proxyable(kind: HandleKind) -> bool {
    matches!(
        kind,
        HandleKind::Database
            | HandleKind::Transaction
            | HandleKind::ObjectStore
            | HandleKind::Index
            | HandleKind::Cursor
            | HandleKind::CursorWithValue
    )
}
