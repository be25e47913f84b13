//! Error types for the adapter.

use awaitdb_native::{ErrorName, NativeError};
use thiserror::Error;

/// Errors surfaced by the adapter.
///
/// Failures raised by the storage engine are carried unchanged in
/// [`Error::Native`]; the other variants are the adapter's own.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The engine rejected an operation.
    #[error(transparent)]
    Native(#[from] NativeError),

    /// A member that is not a method was called.
    #[error("{name} is not callable")]
    NotCallable { name: String },

    /// A wrapped handle was required.
    #[error("expected {expected}")]
    NotAHandle { expected: &'static str },

    /// A value cannot be handed back to the engine.
    #[error("{0} cannot be passed to the storage engine")]
    Unwrappable(&'static str),
}

impl Error {
    /// The underlying engine error, if this is one.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Error::Native(e) => Some(e),
            _ => None,
        }
    }

    /// Check the engine error's name.
    pub fn is(&self, name: ErrorName) -> bool {
        self.native().is_some_and(|e| e.is(name))
    }
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;
