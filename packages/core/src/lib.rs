//! awaitdb-core: a future-based, identity-stable adapter over an
//! event-driven storage engine.
//!
//! The engine (anything implementing the `awaitdb-native` boundary) hands
//! out raw handles and reports outcomes as events. This crate wraps those
//! handles so that:
//!
//! - the same raw object always comes back as the same [`Handle`]
//! - requests become [`Promise`]s, and every transaction has a `done`
//!   promise
//! - method calls on a handle run against the raw receiver and wrap what
//!   they return
//! - behaviour can be layered on with hooks ([`Registry::add_hook`]),
//!   such as the stock [`convenience`] methods and cursor [`iteration`]
//!
//! # Example
//!
//! ```rust
//! use awaitdb_core::{args, convenience, open, OpenOptions, Registry, Wrapper};
//! use awaitdb_memory::MemoryFactory;
//!
//! let factory = MemoryFactory::new();
//! let mut registry = Registry::new();
//! registry.add_hook(convenience);
//! let wrapper = Wrapper::new(registry);
//!
//! let options = OpenOptions::new().upgrade(|up| {
//!     up.db.call("createObjectStore", args!["notes"]).unwrap();
//! });
//! let title = factory
//!     .run_until(async {
//!         let db = open(&wrapper, &factory, "scratch", Some(1), options)
//!             .await?
//!             .into_handle()?;
//!         db.invoke("put", args!["notes", "hello", 1]).await?;
//!         db.invoke("get", args!["notes", 1]).await
//!     })
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(title.as_str(), Some("hello"));
//! ```

mod adapter;
mod cache;
mod entry;
mod error;
mod extras;
mod handle;
mod hooks;
mod iterate;
mod promise;
mod wrapped;
mod wrapper;

pub use cache::WrapperId;
pub use entry::{delete, open, DeleteOptions, OpenOptions, Upgrade};
pub use error::{Error, Result};
pub use extras::convenience;
pub use handle::{Handle, Method};
pub use hooks::{Hook, HookSet, NativeHooks, Registry};
pub use iterate::{iteration, CursorSequence, ASYNC_ITERATOR, ITERATE};
pub use promise::{Promise, Resolver};
pub use wrapped::Wrapped;
pub use wrapper::Wrapper;
