//! awaitdb: await your database.
//!
//! An identity-stable, future-based interface over an event-driven
//! transactional storage engine. [`AwaitDb`] bundles an engine's factory
//! with a wrapper whose hook chain carries the stock extensions:
//!
//! - convenience reads and writes on database handles
//!   (`db.get("books", 1)`, `db.put("books", record)`, `getAllFromIndex`, ...)
//! - cursor iteration on stores, indexes and cursors (`store.iterate()`)
//!
//! # Example
//!
//! ```rust
//! use awaitdb::{args, AwaitDb, OpenOptions, Value};
//! use awaitdb_memory::MemoryFactory;
//!
//! let factory = MemoryFactory::new();
//! let awaitdb = AwaitDb::new(factory.clone());
//!
//! let options = OpenOptions::new().upgrade(|up| {
//!     up.db.call("createObjectStore", args!["kv"]).unwrap();
//! });
//! let value = factory
//!     .run_until(async {
//!         let db = awaitdb.open("demo", Some(1), options).await?.into_handle()?;
//!         db.invoke("put", args!["kv", "v", "k"]).await?;
//!         db.invoke("get", args!["kv", "k"]).await
//!     })
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(value.as_value(), Some(&Value::from("v")));
//! ```

use std::fmt;
use std::rc::Rc;

use tracing::debug;

pub use awaitdb_core::*;
pub use awaitdb_native as native;
pub use awaitdb_native::{
    ErrorName, Event, EventType, HandleKind, Key, KeyPath, KeyRange, NativeError, NativeFactory,
    RawHandle, RawValue, Value,
};

/// A factory plus a frozen hook chain.
#[derive(Clone)]
pub struct AwaitDb {
    factory: Rc<dyn NativeFactory>,
    wrapper: Wrapper,
}

impl AwaitDb {
    /// An adapter with the stock extensions and nothing else.
    pub fn new(factory: impl NativeFactory + 'static) -> Self {
        Self::builder(factory).build()
    }

    pub fn builder(factory: impl NativeFactory + 'static) -> AwaitDbBuilder {
        let mut registry = Registry::new();
        registry.add_hook(convenience).add_hook(iteration);
        AwaitDbBuilder {
            factory: Rc::new(factory),
            registry,
        }
    }

    /// Open `name`, upgrading it to `version` if that is newer.
    pub fn open(&self, name: &str, version: Option<u64>, options: OpenOptions) -> Promise {
        open(&self.wrapper, self.factory.as_ref(), name, version, options)
    }

    /// Delete `name`.
    pub fn delete(&self, name: &str, options: DeleteOptions) -> Promise {
        delete(&self.wrapper, self.factory.as_ref(), name, options)
    }

    pub fn wrap(&self, raw: RawValue) -> Wrapped {
        self.wrapper.wrap(raw)
    }

    pub fn unwrap(&self, wrapped: &Wrapped) -> Option<RawValue> {
        self.wrapper.unwrap(wrapped)
    }

    pub fn wrapper(&self) -> &Wrapper {
        &self.wrapper
    }
}

impl fmt::Debug for AwaitDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitDb").finish_non_exhaustive()
    }
}

/// Builder for [`AwaitDb`]. Hooks added here are asked before the stock
/// ones.
pub struct AwaitDbBuilder {
    factory: Rc<dyn NativeFactory>,
    registry: Registry,
}

impl AwaitDbBuilder {
    pub fn add_hook(
        mut self,
        hook: impl FnOnce(Rc<dyn HookSet>) -> Rc<dyn HookSet> + 'static,
    ) -> Self {
        self.registry.add_hook(hook);
        self
    }

    pub fn build(self) -> AwaitDb {
        debug!(hooks = self.registry.len(), "building adapter");
        AwaitDb {
            factory: self.factory,
            wrapper: Wrapper::new(self.registry),
        }
    }
}

impl fmt::Debug for AwaitDbBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitDbBuilder")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awaitdb_memory::MemoryFactory;

    struct Motto(Rc<dyn HookSet>);

    impl HookSet for Motto {
        fn get(&self, target: &Handle, name: &str) -> Wrapped {
            if target.kind() == HandleKind::Database && name == "motto" {
                return Wrapped::from("await all the things");
            }
            self.0.get(target, name)
        }

        fn has(&self, target: &Handle, name: &str) -> bool {
            (target.kind() == HandleKind::Database && name == "motto") || self.0.has(target, name)
        }
    }

    #[test]
    fn builder_hooks_sit_on_top_of_the_stock_ones() {
        let factory = MemoryFactory::new();
        let awaitdb = AwaitDb::builder(factory.clone())
            .add_hook(|previous| Rc::new(Motto(previous)))
            .build();

        let db = factory
            .run_until(awaitdb.open("hooked", Some(1), OpenOptions::new()))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(db.get("motto").as_str(), Some("await all the things"));
        assert!(db.has("getAllFromIndex"));
        assert!(db.has("motto"));
    }

    #[test]
    fn open_failures_reject() {
        let factory = MemoryFactory::new();
        let awaitdb = AwaitDb::new(factory.clone());
        factory
            .run_until(awaitdb.open("v", Some(2), OpenOptions::new()))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap()
            .call("close", vec![])
            .unwrap();

        let err = factory
            .run_until(awaitdb.open("v", Some(1), OpenOptions::new()))
            .unwrap()
            .unwrap_err();
        assert!(err.is(ErrorName::Version));
    }
}
