//! Argument decoding shared by the handle types.

use awaitdb_native::{HandleKind, Key, KeyRange, NativeError, NativeMethod, NativeResult, RawValue, Value};

const UNDEFINED: RawValue = RawValue::Undefined;

pub(crate) fn arg(args: &[RawValue], i: usize) -> &RawValue {
    args.get(i).unwrap_or(&UNDEFINED)
}

/// A plain value argument; undefined reads as null.
pub(crate) fn value(args: &[RawValue], i: usize) -> NativeResult<Value> {
    match arg(args, i) {
        RawValue::Undefined => Ok(Value::Null),
        RawValue::Data(v) => Ok(v.clone()),
        other => Err(NativeError::data(format!(
            "argument {} is not storable: {:?}",
            i, other
        ))),
    }
}

pub(crate) fn optional_key(args: &[RawValue], i: usize) -> NativeResult<Option<Key>> {
    match arg(args, i) {
        v if v.is_nullish() => Ok(None),
        RawValue::Data(v) => Key::try_from_value(v).map(Some),
        other => Err(NativeError::data(format!("{:?} is not a valid key", other))),
    }
}

pub(crate) fn key(args: &[RawValue], i: usize) -> NativeResult<Key> {
    optional_key(args, i)?.ok_or_else(|| NativeError::data("a key is required"))
}

/// A key or key range; nullish means "everything".
pub(crate) fn query(args: &[RawValue], i: usize) -> NativeResult<Option<KeyRange>> {
    match arg(args, i) {
        RawValue::Range(r) => Ok(Some(r.clone())),
        v if v.is_nullish() => Ok(None),
        RawValue::Data(v) => Ok(Some(KeyRange::only(Key::try_from_value(v)?))),
        other => Err(NativeError::data(format!(
            "{:?} is not a key or key range",
            other
        ))),
    }
}

pub(crate) fn required_query(args: &[RawValue], i: usize) -> NativeResult<KeyRange> {
    query(args, i)?.ok_or_else(|| NativeError::data("a key or key range is required"))
}

/// A result limit; nullish or zero means unlimited.
pub(crate) fn count(args: &[RawValue], i: usize) -> NativeResult<Option<usize>> {
    match arg(args, i) {
        v if v.is_nullish() => Ok(None),
        RawValue::Data(v) => match v.as_u64() {
            Some(0) => Ok(None),
            Some(n) => Ok(Some(n as usize)),
            None => Err(NativeError::type_error(format!("{:?} is not a valid count", v))),
        },
        other => Err(NativeError::type_error(format!("{:?} is not a valid count", other))),
    }
}

pub(crate) fn string(args: &[RawValue], i: usize, what: &str) -> NativeResult<String> {
    arg(args, i)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| NativeError::type_error(format!("{} must be a string", what)))
}

/// A store name or a list of store names.
pub(crate) fn names(args: &[RawValue], i: usize) -> NativeResult<Vec<String>> {
    let invalid = || NativeError::type_error("store names must be a string or a list of strings");
    match arg(args, i) {
        RawValue::Data(Value::String(s)) => Ok(vec![s.clone()]),
        RawValue::Data(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid),
        RawValue::List(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// An optional enum-like string argument, parsed with `FromStr`.
pub(crate) fn parsed<T>(args: &[RawValue], i: usize) -> NativeResult<Option<T>>
where
    T: std::str::FromStr<Err = NativeError>,
{
    match arg(args, i) {
        v if v.is_nullish() => Ok(None),
        v => match v.as_str() {
            Some(s) => s.parse().map(Some),
            None => Err(NativeError::type_error(format!("{:?} is not a string", v))),
        },
    }
}

pub(crate) fn method(kind: HandleKind, name: &str) -> Option<RawValue> {
    Some(RawValue::Method(NativeMethod::new(kind, name)))
}

pub(crate) fn names_value(names: Vec<String>) -> RawValue {
    RawValue::Data(Value::from(names))
}
