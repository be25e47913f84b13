//! Values on the adapter side of the boundary.

use awaitdb_native::{KeyRange, NativeError, RawHandle, Value};

use crate::{CursorSequence, Error, Handle, Method, Promise, Result};

/// Anything a wrapped handle can yield or accept.
///
/// Engine objects of a proxyable kind become [`Wrapped::Handle`], pending
/// requests become [`Wrapped::Future`], and plain data passes through
/// untouched.
#[derive(Clone, Debug, Default)]
pub enum Wrapped {
    #[default]
    Undefined,
    Data(Value),
    Range(KeyRange),
    /// An error object read as a property (`transaction.error`).
    Error(NativeError),
    Handle(Handle),
    /// An engine object the adapter does not proxy, e.g. the factory.
    Raw(RawHandle),
    Future(Promise),
    Method(Method),
    Sequence(CursorSequence),
    List(Vec<Wrapped>),
}

impl Wrapped {
    /// Undefined or null.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Wrapped::Undefined | Wrapped::Data(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Wrapped::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Wrapped::Data(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Wrapped::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Result<Handle> {
        match self {
            Wrapped::Handle(h) => Ok(h),
            _ => Err(Error::NotAHandle {
                expected: "a wrapped handle",
            }),
        }
    }

    pub fn as_future(&self) -> Option<&Promise> {
        match self {
            Wrapped::Future(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&Method> {
        match self {
            Wrapped::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_sequence(self) -> Result<CursorSequence> {
        match self {
            Wrapped::Sequence(s) => Ok(s),
            _ => Err(Error::NotAHandle {
                expected: "a cursor sequence",
            }),
        }
    }

    /// Resolve a future, or return any other value as is.
    pub async fn settle(self) -> Result<Wrapped> {
        match self {
            Wrapped::Future(p) => p.await,
            other => Ok(other),
        }
    }
}

impl From<Value> for Wrapped {
    fn from(v: Value) -> Self {
        Wrapped::Data(v)
    }
}

impl From<serde_json::Value> for Wrapped {
    fn from(v: serde_json::Value) -> Self {
        Wrapped::Data(Value::from_json(v))
    }
}

impl From<&str> for Wrapped {
    fn from(v: &str) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<String> for Wrapped {
    fn from(v: String) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<i64> for Wrapped {
    fn from(v: i64) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<i32> for Wrapped {
    fn from(v: i32) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<f64> for Wrapped {
    fn from(v: f64) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<bool> for Wrapped {
    fn from(v: bool) -> Self {
        Wrapped::Data(Value::from(v))
    }
}

impl From<KeyRange> for Wrapped {
    fn from(v: KeyRange) -> Self {
        Wrapped::Range(v)
    }
}

impl From<Handle> for Wrapped {
    fn from(v: Handle) -> Self {
        Wrapped::Handle(v)
    }
}

impl From<&Handle> for Wrapped {
    fn from(v: &Handle) -> Self {
        Wrapped::Handle(v.clone())
    }
}

impl From<Promise> for Wrapped {
    fn from(v: Promise) -> Self {
        Wrapped::Future(v)
    }
}

impl From<Vec<Wrapped>> for Wrapped {
    fn from(v: Vec<Wrapped>) -> Self {
        Wrapped::List(v)
    }
}

/// Build an argument list, converting each element with `Wrapped::from`.
///
/// ```rust
/// use awaitdb_core::{args, Wrapped};
///
/// let a: Vec<Wrapped> = args!["books", 1];
/// assert_eq!(a.len(), 2);
/// assert_eq!(a[0].as_str(), Some("books"));
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Wrapped>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Wrapped::from($arg)),+]
    };
}
