//! The interception chain.
//!
//! Every member read on a [`Handle`] is answered by a [`HookSet`]. The
//! chain starts with [`NativeHooks`], which reads the raw object; each
//! registered hook receives the current head and returns a new one that
//! may answer some names itself and pass the rest on.
//!
//! ```rust
//! use std::rc::Rc;
//! use awaitdb_core::{Handle, HookSet, Registry, Wrapped};
//!
//! struct Shout(Rc<dyn HookSet>);
//!
//! impl HookSet for Shout {
//!     fn get(&self, target: &Handle, name: &str) -> Wrapped {
//!         match name {
//!             "shout" => Wrapped::from("HELLO"),
//!             _ => self.0.get(target, name),
//!         }
//!     }
//!
//!     fn has(&self, target: &Handle, name: &str) -> bool {
//!         name == "shout" || self.0.has(target, name)
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.add_hook(|previous| Rc::new(Shout(previous)));
//! assert_eq!(registry.len(), 1);
//! ```

use std::fmt;
use std::rc::Rc;

use awaitdb_native::{HandleKind, RawValue, Value};
use tracing::debug;

use crate::{Handle, Wrapped};

/// Answers member reads and membership checks for wrapped handles.
pub trait HookSet {
    /// Read `name` on `target`. Absent members are [`Wrapped::Undefined`].
    fn get(&self, target: &Handle, name: &str) -> Wrapped;

    /// Does `target` have a member called `name`?
    fn has(&self, target: &Handle, name: &str) -> bool;
}

/// The end of every chain: raw members, wrapped.
///
/// Transactions get two extra members: `done`, the transaction's
/// completion future, and `store`, the sole store in scope.
pub struct NativeHooks;

impl HookSet for NativeHooks {
    fn get(&self, target: &Handle, name: &str) -> Wrapped {
        let raw = target.raw();
        let wrapper = target.wrapper();
        if raw.kind() == HandleKind::Transaction {
            match name {
                "done" => return Wrapped::Future(wrapper.completion(raw)),
                "store" => return sole_store(target),
                _ => {}
            }
        }
        match raw.property(name) {
            Some(value) => wrapper.wrap(value),
            None => Wrapped::Undefined,
        }
    }

    fn has(&self, target: &Handle, name: &str) -> bool {
        let raw = target.raw();
        (raw.kind() == HandleKind::Transaction && matches!(name, "done" | "store"))
            || raw.has_property(name)
    }
}

/// The store of a single-store transaction; undefined when the scope
/// holds zero or several stores.
fn sole_store(tx: &Handle) -> Wrapped {
    let names = match tx.raw().property("objectStoreNames") {
        Some(RawValue::Data(Value::Array(names))) => names,
        _ => return Wrapped::Undefined,
    };
    let [name] = names.as_slice() else {
        return Wrapped::Undefined;
    };
    match tx
        .raw()
        .invoke("objectStore", vec![RawValue::Data(name.clone())])
    {
        Ok(store) => tx.wrapper().wrap(store),
        Err(_) => Wrapped::Undefined,
    }
}

/// A chain transformation: takes the current head, returns the new one.
pub type Hook = Box<dyn FnOnce(Rc<dyn HookSet>) -> Rc<dyn HookSet>>;

/// Hooks waiting to be frozen into a [`Wrapper`](crate::Wrapper).
///
/// Registration order is precedence order: the hook added last is asked
/// first. Once a wrapper is built from a registry its chain never
/// changes.
#[derive(Default)]
pub struct Registry {
    hooks: Vec<Hook>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(
        &mut self,
        hook: impl FnOnce(Rc<dyn HookSet>) -> Rc<dyn HookSet> + 'static,
    ) -> &mut Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn freeze(self) -> Rc<dyn HookSet> {
        let count = self.hooks.len();
        let head = self
            .hooks
            .into_iter()
            .fold(Rc::new(NativeHooks) as Rc<dyn HookSet>, |head, hook| hook(head));
        debug!(hooks = count, "hook chain frozen");
        head
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
