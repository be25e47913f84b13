//! Settle-once futures with identity.
//!
//! A [`Promise`] is a shared slot that is filled exactly once, with either
//! a value or an error. Clones refer to the same slot, so a promise can be
//! cached and handed out repeatedly (`tx.done` is one promise per
//! transaction) and compared by identity with [`Promise::ptr_eq`].
//!
//! ```rust
//! use awaitdb_core::{Promise, Wrapped};
//!
//! let (promise, resolver) = Promise::channel();
//! assert!(!promise.is_settled());
//! resolver.resolve(Wrapped::from(7));
//! assert!(promise.is_settled());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::trace;

use crate::cache::WrapperId;
use crate::{Error, Result, Wrapped};

type Callback = Box<dyn FnOnce(&Result<Wrapped>)>;

struct PromiseInner {
    id: WrapperId,
    outcome: RefCell<Option<Result<Wrapped>>>,
    callbacks: RefCell<Vec<Callback>>,
    notify: Notify,
}

/// A cloneable, settle-once future of a [`Wrapped`] value.
#[derive(Clone)]
pub struct Promise(Rc<PromiseInner>);

/// The settling side of a [`Promise`]. Only the first settlement counts.
#[derive(Clone)]
pub struct Resolver(Promise);

impl Promise {
    fn pending() -> Self {
        Promise(Rc::new(PromiseInner {
            id: WrapperId::allocate(),
            outcome: RefCell::new(None),
            callbacks: RefCell::new(Vec::new()),
            notify: Notify::new(),
        }))
    }

    /// A pending promise and the resolver that settles it.
    pub fn channel() -> (Promise, Resolver) {
        let promise = Promise::pending();
        (promise.clone(), Resolver(promise))
    }

    /// An already-fulfilled promise.
    pub fn resolved(value: Wrapped) -> Self {
        let promise = Promise::pending();
        promise.settle(Ok(value));
        promise
    }

    /// An already-rejected promise.
    pub fn rejected(error: impl Into<Error>) -> Self {
        let promise = Promise::pending();
        promise.settle(Err(error.into()));
        promise
    }

    pub(crate) fn id(&self) -> WrapperId {
        self.0.id
    }

    pub fn is_settled(&self) -> bool {
        self.0.outcome.borrow().is_some()
    }

    /// The outcome, if settled.
    pub fn peek(&self) -> Option<Result<Wrapped>> {
        self.0.outcome.borrow().clone()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn settle(&self, outcome: Result<Wrapped>) {
        if self.is_settled() {
            return;
        }
        trace!(promise = %self.0.id, ok = outcome.is_ok(), "promise settled");
        *self.0.outcome.borrow_mut() = Some(outcome.clone());
        let callbacks: Vec<Callback> = self.0.callbacks.borrow_mut().drain(..).collect();
        for callback in callbacks {
            callback(&outcome);
        }
        self.0.notify.notify_waiters();
    }

    /// Run `callback` once the promise settles (immediately if it has).
    pub fn on_settled(&self, callback: impl FnOnce(&Result<Wrapped>) + 'static) {
        let settled = self.peek();
        match settled {
            Some(outcome) => callback(&outcome),
            None => self.0.callbacks.borrow_mut().push(Box::new(callback)),
        }
    }
}

impl Resolver {
    pub fn resolve(&self, value: Wrapped) {
        self.0.settle(Ok(value));
    }

    pub fn reject(&self, error: impl Into<Error>) {
        self.0.settle(Err(error.into()));
    }

    pub fn settle(&self, outcome: Result<Wrapped>) {
        self.0.settle(outcome);
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.0.outcome.borrow() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        write!(f, "Promise({}, {})", self.0.id, state)
    }
}

impl IntoFuture for Promise {
    type Output = Result<Wrapped>;
    type IntoFuture = Pin<Box<dyn Future<Output = Result<Wrapped>>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            loop {
                // Register before checking so a settle in between is not missed.
                let notified = self.0.notify.notified();
                if let Some(outcome) = self.peek() {
                    return outcome;
                }
                notified.await;
            }
        })
    }
}
