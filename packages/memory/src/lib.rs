//! An in-memory, event-driven storage engine.
//!
//! This crate plays the part of the host database: it hands out raw
//! handles, fires events from its own task queue, auto-commits
//! transactions once their request queue runs dry and rolls them back on
//! failure. Tests and examples drive it with [`MemoryFactory::run_until`].
//!
//! Supported surface:
//!
//! - databases with versioned upgrades, `blocked`/`versionchange`
//!   negotiation, deletion and forced termination
//! - readonly/readwrite/versionchange transactions with scope-based
//!   ordering
//! - object stores with in-line or out-of-line keys and key generators
//! - unique and multi-entry indexes
//! - cursors in all four directions, with `continue`,
//!   `continuePrimaryKey`, `advance`, `update` and `delete`

mod args;
mod connection;
mod cursor;
mod data;
mod engine;
mod event_loop;
mod factory;
mod request;
mod store;
mod transaction;

pub use connection::Connection;
pub use cursor::Cursor;
pub use event_loop::EventLoop;
pub use factory::MemoryFactory;
pub use request::Request;
pub use store::{Index, ObjectStore};
pub use transaction::Transaction;
