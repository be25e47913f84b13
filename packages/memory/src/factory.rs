//! The public entry point to the engine.

use std::future::IntoFuture;
use std::rc::Rc;

use awaitdb_native::{NativeFactory, NativeResult, RawHandle};

use crate::engine::Engine;

/// An in-memory database factory with its own event loop.
///
/// Clones share the same databases and the same loop.
///
/// ```rust
/// use awaitdb_memory::MemoryFactory;
/// use awaitdb_native::NativeFactory;
///
/// let factory = MemoryFactory::new();
/// let request = factory.open("scratch", Some(1)).unwrap();
/// factory.drain();
/// assert_eq!(request.property("readyState").unwrap().as_str(), Some("done"));
/// assert_eq!(factory.version_of("scratch"), Some(1));
/// ```
#[derive(Clone)]
pub struct MemoryFactory {
    engine: Rc<Engine>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    /// Drive `future` to completion on this factory's event loop.
    pub fn run_until<F: IntoFuture>(&self, future: F) -> NativeResult<F::Output> {
        self.engine.event_loop().run_until(future)
    }

    /// Run queued tasks until none are left.
    pub fn drain(&self) {
        self.engine.event_loop().drain();
    }

    /// Number of queued tasks.
    pub fn pending_tasks(&self) -> usize {
        self.engine.event_loop().pending()
    }

    /// Names of the databases that currently exist.
    pub fn database_names(&self) -> Vec<String> {
        self.engine.database_names()
    }

    pub fn version_of(&self, name: &str) -> Option<u64> {
        self.engine.version_of(name)
    }

    /// Force-close every connection to `name`.
    ///
    /// Running transactions abort and each connection receives a `close`
    /// event, as when a browser discards a database out from under a page.
    pub fn terminate(&self, name: &str) {
        self.engine.terminate(name);
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeFactory for MemoryFactory {
    fn open(&self, name: &str, version: Option<u64>) -> NativeResult<RawHandle> {
        let request = self.engine.open(name, version)?;
        Ok(request.handle())
    }

    fn delete_database(&self, name: &str) -> NativeResult<RawHandle> {
        Ok(self.engine.delete_database(name).handle())
    }
}
