//! One-call reads and writes on a database handle.
//!
//! With this hook installed, a wrapped database answers `get`, `getKey`,
//! `getAll`, `getAllKeys` and `count` (plus a `...FromIndex` variant of
//! each) and `put`, `add`, `delete` and `clear`. The first argument names
//! the store; index variants take the index name second. Each call opens
//! its own transaction.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use awaitdb_native::{HandleKind, NativeError};
use tracing::trace;

use crate::{Handle, HookSet, Method, Promise, Result, Wrapped};

const READ_METHODS: [&str; 5] = ["get", "getKey", "getAll", "getAllKeys", "count"];
const WRITE_METHODS: [&str; 4] = ["put", "add", "delete", "clear"];
const INDEX_SUFFIX: &str = "FromIndex";

/// The convenience hook. Install with
/// `registry.add_hook(awaitdb_core::convenience)`.
pub fn convenience(previous: Rc<dyn HookSet>) -> Rc<dyn HookSet> {
    Rc::new(Convenience {
        previous,
        resolved: RefCell::new(HashMap::new()),
    })
}

struct Convenience {
    previous: Rc<dyn HookSet>,
    /// Only names that resolved; anything else is recomputed.
    resolved: RefCell<HashMap<String, Method>>,
}

impl Convenience {
    fn claims(&self, target: &Handle, name: &str) -> Option<Method> {
        if target.kind() != HandleKind::Database || target.raw().has_property(name) {
            return None;
        }
        if let Some(method) = self.resolved.borrow().get(name) {
            return Some(method.clone());
        }
        let method = resolve(name)?;
        self.resolved
            .borrow_mut()
            .insert(name.to_string(), method.clone());
        Some(method)
    }
}

impl HookSet for Convenience {
    fn get(&self, target: &Handle, name: &str) -> Wrapped {
        match self.claims(target, name) {
            Some(method) => Wrapped::Method(method),
            None => self.previous.get(target, name),
        }
    }

    fn has(&self, target: &Handle, name: &str) -> bool {
        self.claims(target, name).is_some() || self.previous.has(target, name)
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Read { from_index: bool },
    Write,
}

fn resolve(name: &str) -> Option<Method> {
    let (base, from_index) = match name.strip_suffix(INDEX_SUFFIX) {
        Some(base) => (base, true),
        None => (name, false),
    };
    let kind = if READ_METHODS.contains(&base) {
        Kind::Read { from_index }
    } else if WRITE_METHODS.contains(&base) && !from_index {
        Kind::Write
    } else {
        return None;
    };
    trace!(method = name, "resolved convenience method");

    let base = base.to_string();
    Some(Method::new(name, move |db, args| {
        // Failures surface through the returned future, like engine ones.
        Ok(run(db, &base, kind, args)
            .unwrap_or_else(|e| Wrapped::Future(Promise::rejected(e))))
    }))
}

fn run(db: &Handle, op: &str, kind: Kind, args: Vec<Wrapped>) -> Result<Wrapped> {
    let mut args = args.into_iter();
    let store = args
        .next()
        .ok_or_else(|| NativeError::type_error(format!("{op} needs a store name")))?;
    let mode = match kind {
        Kind::Read { .. } => "readonly",
        Kind::Write => "readwrite",
    };

    let tx = db
        .call("transaction", vec![store, Wrapped::from(mode)])?
        .into_handle()?;
    let mut target = tx.get("store").into_handle()?;

    match kind {
        Kind::Read { from_index } => {
            if from_index {
                let index = args.next().ok_or_else(|| {
                    NativeError::type_error(format!("{op}{INDEX_SUFFIX} needs an index name"))
                })?;
                target = target.call("index", vec![index])?.into_handle()?;
            }
            target.call(op, args.collect())
        }
        Kind::Write => {
            let done = tx.get("done");
            target.call(op, args.collect())?;
            Ok(done)
        }
    }
}
