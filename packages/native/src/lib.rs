//! awaitdb-native: the storage engine boundary.
//!
//! This is the narrow waist between an event-driven transactional storage
//! engine and the future-based adapter built on top of it. Nothing here is
//! async: operations return request handles, and outcomes arrive later as
//! events on those handles.
//!
//! - [`NativeObject`] / [`RawHandle`]: an engine object with a dynamic,
//!   name-addressed member surface
//! - [`NativeMethod`]: an unbound method, invoked against a receiver
//! - [`RawValue`]: anything crossing the boundary
//! - [`Value`], [`Key`], [`KeyRange`], [`KeyPath`]: the data model
//! - [`NativeError`]: engine failures, by well-known name
//! - [`NativeFactory`]: open/delete entry points
//!
//! # Example
//!
//! ```rust
//! use awaitdb_native::{HandleKind, NativeMethod, RawValue};
//!
//! // Methods are unbound; calling one without a proper receiver fails.
//! let get = NativeMethod::new(HandleKind::ObjectStore, "get");
//! let err = get.call(&RawValue::Undefined, vec![]).unwrap_err();
//! assert_eq!(err.name.as_str(), "TypeError");
//! ```

mod error;
mod events;
mod factory;
mod handle;
mod key;
mod options;
mod value;

pub use error::{ErrorName, NativeError, NativeResult};
pub use events::{Event, EventTarget, EventType, Listener, ListenerId, ListenerList};
pub use factory::NativeFactory;
pub use handle::{
    HandleId, HandleKind, NativeMethod, NativeObject, RawHandle, RawValue, WeakRawHandle,
};
pub use key::{Key, KeyPath, KeyRange};
pub use options::{
    decode_options, encode_options, CursorDirection, IndexOptions, StoreOptions, TransactionMode,
};
pub use value::Value;
