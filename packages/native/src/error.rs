//! Native error type.
//!
//! Errors raised by the storage engine are modelled on the DOM exception
//! taxonomy: a well-known name plus a free-form message. The adapter layers
//! above never rewrite these; they travel to the caller unchanged.

use std::fmt;

/// Well-known native error names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorName {
    /// A transaction was aborted.
    Abort,
    /// A mutation violated a constraint (duplicate key, unique index).
    Constraint,
    /// A key or value was not valid for the operation.
    Data,
    /// The object is in the wrong state for the operation.
    InvalidState,
    /// The operation is not allowed on this kind of object.
    InvalidAccess,
    /// A named database, store or index does not exist.
    NotFound,
    /// A write was attempted in a read-only transaction.
    ReadOnly,
    /// A request was issued against a finished transaction.
    TransactionInactive,
    /// An open request asked for a lower version than the existing one.
    Version,
    /// A method was invoked with the wrong receiver or arguments.
    Type,
    /// Anything else.
    Unknown,
}

impl ErrorName {
    /// The canonical string form, e.g. `"ConstraintError"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorName::Abort => "AbortError",
            ErrorName::Constraint => "ConstraintError",
            ErrorName::Data => "DataError",
            ErrorName::InvalidState => "InvalidStateError",
            ErrorName::InvalidAccess => "InvalidAccessError",
            ErrorName::NotFound => "NotFoundError",
            ErrorName::ReadOnly => "ReadOnlyError",
            ErrorName::TransactionInactive => "TransactionInactiveError",
            ErrorName::Version => "VersionError",
            ErrorName::Type => "TypeError",
            ErrorName::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by the storage engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct NativeError {
    /// The error's well-known name.
    pub name: ErrorName,
    /// Human-readable detail.
    pub message: String,
}

impl NativeError {
    /// Create an error with the given name and message.
    pub fn new(name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Abort, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Constraint, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Data, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorName::InvalidState, message)
    }

    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new(ErrorName::InvalidAccess, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorName::NotFound, message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(ErrorName::ReadOnly, message)
    }

    pub fn inactive(message: impl Into<String>) -> Self {
        Self::new(ErrorName::TransactionInactive, message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Version, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Type, message)
    }

    /// Check the error's name.
    pub fn is(&self, name: ErrorName) -> bool {
        self.name == name
    }
}

/// Result type for native operations.
pub type NativeResult<T> = Result<T, NativeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_name_and_message() {
        let e = NativeError::constraint("key already exists");
        assert_eq!(format!("{}", e), "ConstraintError: key already exists");
    }

    #[test]
    fn is_checks_name() {
        let e = NativeError::not_found("no store 'books'");
        assert!(e.is(ErrorName::NotFound));
        assert!(!e.is(ErrorName::Abort));
    }

    #[test]
    fn errors_compare_by_value() {
        assert_eq!(NativeError::abort("x"), NativeError::abort("x"));
        assert_ne!(NativeError::abort("x"), NativeError::data("x"));
    }
}
