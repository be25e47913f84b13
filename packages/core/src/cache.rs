//! Identity bookkeeping between raw handles and their wrappers.
//!
//! Every table here is a side table keyed by a stable id. Nothing in it
//! keeps a raw handle or a wrapper alive: entries hold weak references
//! and are removed when the wrapper is dropped, or pruned once the raw
//! side is gone.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use awaitdb_native::{HandleId, NativeMethod, RawHandle, WeakRawHandle};
use tracing::trace;

use crate::handle::HandleInner;
use crate::{Handle, Method, Promise};

static NEXT_WRAPPER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an adapter-side object (a wrapped handle or a future).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(u64);

impl WrapperId {
    pub(crate) fn allocate() -> Self {
        WrapperId(NEXT_WRAPPER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

const PRUNE_FLOOR: usize = 64;

#[derive(Default)]
pub(crate) struct IdentityCache {
    /// raw → wrapper
    forward: RefCell<HashMap<HandleId, Weak<HandleInner>>>,
    /// wrapper (or request future) → raw
    reverse: RefCell<HashMap<WrapperId, WeakRawHandle>>,
    methods: RefCell<HashMap<NativeMethod, Method>>,
    completions: RefCell<HashMap<HandleId, (WeakRawHandle, Promise)>>,
    /// cursor → the request that reports its steps
    cursor_requests: RefCell<HashMap<HandleId, (WeakRawHandle, WeakRawHandle)>>,
    prune_at: Cell<usize>,
}

impl IdentityCache {
    pub(crate) fn lookup(&self, raw: &RawHandle) -> Option<Handle> {
        let found = self.forward.borrow().get(&raw.id()).and_then(Weak::upgrade);
        found.map(Handle::from_inner)
    }

    pub(crate) fn insert(&self, handle: &Handle) {
        self.forward
            .borrow_mut()
            .insert(handle.raw().id(), handle.downgrade());
        self.insert_reverse(handle.id(), handle.raw());
    }

    /// Register a wrapper that must unwrap to `raw` without becoming the
    /// canonical wrapper for it.
    pub(crate) fn insert_reverse(&self, id: WrapperId, raw: &RawHandle) {
        self.reverse.borrow_mut().insert(id, raw.downgrade());
        self.maybe_prune();
    }

    pub(crate) fn raw_for(&self, id: WrapperId) -> Option<RawHandle> {
        self.reverse.borrow().get(&id).and_then(WeakRawHandle::upgrade)
    }

    /// Called when a wrapper goes away.
    ///
    /// The forward entry is only dropped if it is dead, so a facade
    /// sharing its raw handle with a live wrapper leaves that one alone.
    pub(crate) fn forget(&self, raw: HandleId, id: WrapperId) {
        // Drops can happen while a table is borrowed; pruning catches those.
        if let Ok(mut forward) = self.forward.try_borrow_mut() {
            if forward.get(&raw).is_some_and(|w| w.strong_count() == 0) {
                forward.remove(&raw);
            }
        }
        if let Ok(mut reverse) = self.reverse.try_borrow_mut() {
            reverse.remove(&id);
        }
    }

    pub(crate) fn method(&self, native: NativeMethod) -> Method {
        self.methods
            .borrow_mut()
            .entry(native)
            .or_insert_with_key(|native| Method::native(native.clone()))
            .clone()
    }

    pub(crate) fn completion(
        &self,
        transaction: &RawHandle,
        create: impl FnOnce() -> Promise,
    ) -> Promise {
        let existing = self
            .completions
            .borrow()
            .get(&transaction.id())
            .map(|(_, promise)| promise.clone());
        if let Some(promise) = existing {
            return promise;
        }
        let promise = create();
        self.completions
            .borrow_mut()
            .insert(transaction.id(), (transaction.downgrade(), promise.clone()));
        self.maybe_prune();
        promise
    }

    pub(crate) fn record_cursor_request(&self, cursor: &RawHandle, request: &RawHandle) {
        self.cursor_requests
            .borrow_mut()
            .insert(cursor.id(), (cursor.downgrade(), request.downgrade()));
    }

    pub(crate) fn cursor_request(&self, cursor: &RawHandle) -> Option<RawHandle> {
        self.cursor_requests
            .borrow()
            .get(&cursor.id())
            .and_then(|(_, request)| request.upgrade())
    }

    fn maybe_prune(&self) {
        let size = self.reverse.borrow().len() + self.completions.borrow().len();
        if size < self.prune_at.get().max(PRUNE_FLOOR) {
            return;
        }
        self.prune();
        let kept = self.reverse.borrow().len() + self.completions.borrow().len();
        self.prune_at.set(kept * 2);
    }

    /// Drop every entry whose raw side (or wrapper) is gone.
    pub(crate) fn prune(&self) {
        self.forward.borrow_mut().retain(|_, w| w.strong_count() > 0);
        self.reverse.borrow_mut().retain(|_, raw| raw.is_alive());
        self.completions
            .borrow_mut()
            .retain(|_, (raw, _)| raw.is_alive());
        self.cursor_requests
            .borrow_mut()
            .retain(|_, (cursor, request)| cursor.is_alive() && request.is_alive());
        trace!(
            forward = self.forward.borrow().len(),
            reverse = self.reverse.borrow().len(),
            "identity cache pruned"
        );
    }

    #[cfg(test)]
    pub(crate) fn sizes(&self) -> (usize, usize) {
        (self.forward.borrow().len(), self.reverse.borrow().len())
    }
}
