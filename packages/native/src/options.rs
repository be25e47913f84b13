//! Modes, directions and creation options.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{KeyPath, NativeError, NativeResult, Value};

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        }
    }

    /// Whether writes are allowed.
    pub fn is_write(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = NativeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(TransactionMode::ReadOnly),
            "readwrite" => Ok(TransactionMode::ReadWrite),
            "versionchange" => Ok(TransactionMode::VersionChange),
            other => Err(NativeError::type_error(format!(
                "'{}' is not a valid transaction mode",
                other
            ))),
        }
    }
}

/// Cursor iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl CursorDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorDirection::Next => "next",
            CursorDirection::NextUnique => "nextunique",
            CursorDirection::Prev => "prev",
            CursorDirection::PrevUnique => "prevunique",
        }
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextUnique)
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, CursorDirection::NextUnique | CursorDirection::PrevUnique)
    }
}

impl fmt::Display for CursorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CursorDirection {
    type Err = NativeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(CursorDirection::Next),
            "nextunique" => Ok(CursorDirection::NextUnique),
            "prev" => Ok(CursorDirection::Prev),
            "prevunique" => Ok(CursorDirection::PrevUnique),
            other => Err(NativeError::type_error(format!(
                "'{}' is not a valid cursor direction",
                other
            ))),
        }
    }
}

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreOptions {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
}

/// Options for creating an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexOptions {
    pub unique: bool,
    pub multi_entry: bool,
}

/// Decode an options map; `Null` yields the defaults.
pub fn decode_options<T: DeserializeOwned + Default>(value: &Value) -> NativeResult<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.to_json())
        .map_err(|e| NativeError::type_error(format!("invalid options: {}", e)))
}

/// Encode options as a value map.
pub fn encode_options<T: Serialize>(options: &T) -> Value {
    serde_json::to_value(options)
        .map(Value::from_json)
        .unwrap_or_default()
}
