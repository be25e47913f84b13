//! Keys, key ranges and key paths.
//!
//! Keys are the orderable subset of [`Value`]: numbers, strings, binary
//! data and arrays of keys. Across types the order is
//! `Number < String < Binary < Array`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{NativeError, NativeResult, Value};

/// A valid record key.
#[derive(Clone, Debug)]
pub enum Key {
    Number(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Binary(_) => 2,
            Key::Array(_) => 3,
        }
    }

    /// Convert a value into a key, if it is a valid one.
    ///
    /// Null, booleans, maps and NaN are not keys.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Integer(i) => Some(Key::Number(*i as f64)),
            Value::Float(f) if !f.is_nan() => Some(Key::Number(*f)),
            Value::String(s) => Some(Key::String(s.clone())),
            Value::Bytes(b) => Some(Key::Binary(b.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Like [`Key::from_value`], failing with a `DataError`.
    pub fn try_from_value(value: &Value) -> NativeResult<Key> {
        Key::from_value(value)
            .ok_or_else(|| NativeError::data(format!("{:?} is not a valid key", value)))
    }

    /// Convert back into a value.
    ///
    /// Integral numbers come back as integers.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    Value::Integer(*n as i64)
                } else {
                    Value::Float(*n)
                }
            }
            Key::String(s) => Value::String(s.clone()),
            Key::Binary(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Number(v as f64)
    }
}

impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Number(v as f64)
    }
}

impl From<f64> for Key {
    fn from(v: f64) -> Self {
        Key::Number(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::String(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::String(v)
    }
}

/// A contiguous interval of keys.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange {
    pub lower: Option<Key>,
    pub upper: Option<Key>,
    pub lower_open: bool,
    pub upper_open: bool,
}

impl KeyRange {
    /// A range containing exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    /// A range with both ends bounded.
    ///
    /// Fails with `DataError` if `lower > upper`, or if they are equal and
    /// either end is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> NativeResult<Self> {
        let lower = lower.into();
        let upper = upper.into();
        match lower.cmp(&upper) {
            Ordering::Greater => Err(NativeError::data("lower bound is greater than upper bound")),
            Ordering::Equal if lower_open || upper_open => {
                Err(NativeError::data("equal bounds with an open end form an empty range"))
            }
            _ => Ok(Self {
                lower: Some(lower),
                upper: Some(upper),
                lower_open,
                upper_open,
            }),
        }
    }

    /// A range with only a lower bound.
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Some(lower.into()),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    /// A range with only an upper bound.
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(upper.into()),
            lower_open: false,
            upper_open: open,
        }
    }

    /// The range covering every key.
    pub fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    /// Check whether `key` falls inside the range.
    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
        };
        let below_upper = match &self.upper {
            None => true,
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
        };
        above_lower && below_upper
    }
}

/// Where a record's key lives inside its value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    /// A single dotted path such as `"id"` or `"meta.id"`.
    Single(String),
    /// A list of paths, producing an array key.
    Multi(Vec<String>),
}

impl KeyPath {
    /// Evaluate the key path against a value.
    pub fn evaluate(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => value.get_dotted(path).and_then(Key::from_value),
            KeyPath::Multi(paths) => paths
                .iter()
                .map(|p| value.get_dotted(p).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Write a generated key into the value at this (single) path.
    pub fn inject(&self, value: &mut Value, key: &Key) -> NativeResult<()> {
        match self {
            KeyPath::Single(path) if value.set_dotted(path, key.to_value()) => Ok(()),
            _ => Err(NativeError::data(
                "cannot inject a generated key into this value",
            )),
        }
    }

    /// Decode a key path from a value (a string or a list of strings).
    pub fn from_value(value: &Value) -> NativeResult<KeyPath> {
        match value {
            Value::String(s) => Ok(KeyPath::Single(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|i| i.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(KeyPath::Multi)
                .ok_or_else(|| NativeError::type_error("key path entries must be strings")),
            other => Err(NativeError::type_error(format!(
                "{:?} is not a key path",
                other
            ))),
        }
    }

    /// Encode as a value.
    pub fn to_value(&self) -> Value {
        match self {
            KeyPath::Single(s) => Value::String(s.clone()),
            KeyPath::Multi(paths) => Value::Array(paths.iter().map(|p| Value::from(p.as_str())).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cross_type_order() {
        let mut keys = vec![
            Key::Array(vec![]),
            Key::Binary(vec![0]),
            Key::from("a"),
            Key::from(10),
            Key::from(-1.5),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::from(-1.5),
                Key::from(10),
                Key::from("a"),
                Key::Binary(vec![0]),
                Key::Array(vec![]),
            ]
        );
    }

    #[test]
    fn integers_and_floats_compare_as_numbers() {
        let a = Key::from_value(&Value::Integer(2)).unwrap();
        let b = Key::from_value(&Value::Float(2.0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_keys_rejected() {
        assert!(Key::from_value(&Value::Null).is_none());
        assert!(Key::from_value(&Value::Bool(true)).is_none());
        assert!(Key::from_value(&Value::Float(f64::NAN)).is_none());
        assert!(Key::from_value(&Value::from(json!([1, null]))).is_none());
        assert!(Key::try_from_value(&Value::map()).is_err());
    }

    #[test]
    fn integral_numbers_round_trip_as_integers() {
        assert_eq!(Key::from(5).to_value(), Value::Integer(5));
        assert_eq!(Key::from(5.5).to_value(), Value::Float(5.5));
    }

    #[test]
    fn range_bounds() {
        let range = KeyRange::bound(1, 5, true, false).unwrap();
        assert!(!range.includes(&Key::from(1)));
        assert!(range.includes(&Key::from(2)));
        assert!(range.includes(&Key::from(5)));
        assert!(!range.includes(&Key::from(6)));

        assert!(KeyRange::only("x").includes(&Key::from("x")));
        assert!(KeyRange::lower_bound(3, false).includes(&Key::from(100)));
        assert!(!KeyRange::upper_bound(3, true).includes(&Key::from(3)));
        assert!(KeyRange::unbounded().includes(&Key::from("anything")));
    }

    #[test]
    fn inverted_range_is_data_error() {
        let err = KeyRange::bound(5, 1, false, false).unwrap_err();
        assert!(err.is(crate::ErrorName::Data));
        assert!(KeyRange::bound(1, 1, true, false).is_err());
    }

    #[test]
    fn key_path_evaluation() {
        let record = Value::from(json!({"id": 3, "author": {"last": "Butler"}}));
        assert_eq!(
            KeyPath::Single("id".into()).evaluate(&record),
            Some(Key::from(3))
        );
        assert_eq!(
            KeyPath::Multi(vec!["author.last".into(), "id".into()]).evaluate(&record),
            Some(Key::Array(vec![Key::from("Butler"), Key::from(3)]))
        );
        assert_eq!(KeyPath::Single("missing".into()).evaluate(&record), None);
    }

    #[test]
    fn key_path_injection() {
        let mut record = Value::from(json!({"title": "Kindred"}));
        KeyPath::Single("id".into())
            .inject(&mut record, &Key::from(1))
            .unwrap();
        assert_eq!(record.get_dotted("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn key_path_from_value() {
        assert_eq!(
            KeyPath::from_value(&Value::from("id")).unwrap(),
            KeyPath::Single("id".into())
        );
        assert_eq!(
            KeyPath::from_value(&Value::from(vec!["a", "b"])).unwrap(),
            KeyPath::Multi(vec!["a".into(), "b".into()])
        );
        assert!(KeyPath::from_value(&Value::Integer(1)).is_err());
    }
}
