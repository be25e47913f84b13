//! Stored data and the pure operations over it.
//!
//! Nothing in here knows about requests, events or transactions; the
//! handle types call into these functions from inside transaction steps.

use std::collections::BTreeMap;

use awaitdb_native::{
    CursorDirection, IndexOptions, Key, KeyPath, KeyRange, NativeError, NativeResult, StoreOptions,
    Value,
};

/// A database's persistent state.
#[derive(Debug, Clone)]
pub struct DatabaseData {
    pub name: String,
    pub version: u64,
    pub stores: BTreeMap<String, StoreData>,
}

impl DatabaseData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            stores: BTreeMap::new(),
        }
    }

    pub fn store(&self, name: &str) -> NativeResult<&StoreData> {
        self.stores
            .get(name)
            .ok_or_else(|| NativeError::not_found(format!("no object store named '{}'", name)))
    }

    pub fn store_mut(&mut self, name: &str) -> NativeResult<&mut StoreData> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| NativeError::not_found(format!("no object store named '{}'", name)))
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }
}

/// Index definition. Index contents are derived from the records.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexMeta {
    pub fn new(key_path: KeyPath, options: &IndexOptions) -> Self {
        Self {
            key_path,
            unique: options.unique,
            multi_entry: options.multi_entry,
        }
    }

    /// The index keys a record contributes.
    pub fn keys_for(&self, value: &Value) -> Vec<Key> {
        match &self.key_path {
            KeyPath::Single(path) if self.multi_entry => match value.get_dotted(path) {
                Some(Value::Array(items)) => {
                    let mut keys: Vec<Key> = items.iter().filter_map(Key::from_value).collect();
                    keys.sort();
                    keys.dedup();
                    keys
                }
                Some(other) => Key::from_value(other).into_iter().collect(),
                None => Vec::new(),
            },
            key_path => key_path.evaluate(value).into_iter().collect(),
        }
    }
}

/// One object store.
#[derive(Debug, Clone)]
pub struct StoreData {
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    /// Next number the key generator hands out.
    pub generator: f64,
    pub records: BTreeMap<Key, Value>,
    pub indexes: BTreeMap<String, IndexMeta>,
}

/// A row as seen by a cursor or a ranged read: (key, primary key, value).
pub type Entry = (Key, Key, Value);

impl StoreData {
    pub fn new(options: &StoreOptions) -> Self {
        Self {
            key_path: options.key_path.clone(),
            auto_increment: options.auto_increment,
            generator: 1.0,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn index(&self, name: &str) -> NativeResult<&IndexMeta> {
        self.indexes
            .get(name)
            .ok_or_else(|| NativeError::not_found(format!("no index named '{}'", name)))
    }

    /// Validation that must happen when a write is issued, not when it runs.
    pub fn check_write(&self, value: &Value, key: Option<&Key>) -> NativeResult<()> {
        match (&self.key_path, key) {
            (Some(_), Some(_)) => Err(NativeError::data(
                "a key was provided for a store that uses in-line keys",
            )),
            (None, None) if !self.auto_increment => Err(NativeError::data(
                "no key provided for a store with out-of-line keys and no key generator",
            )),
            (Some(path), None) => match path.evaluate(value) {
                Some(_) => Ok(()),
                None if self.auto_increment && matches!(path, KeyPath::Single(_)) => {
                    if value.is_map() {
                        Ok(())
                    } else {
                        Err(NativeError::data("generated key cannot be injected into value"))
                    }
                }
                None => Err(NativeError::data(
                    "key path did not yield a valid key for the value",
                )),
            },
            _ => Ok(()),
        }
    }

    fn bump_generator(&mut self, key: &Key) {
        if let Key::Number(n) = key {
            if self.auto_increment && *n >= self.generator {
                self.generator = n.floor() + 1.0;
            }
        }
    }

    fn generate_key(&mut self) -> NativeResult<Key> {
        if self.generator > 9_007_199_254_740_992.0 {
            return Err(NativeError::constraint("key generator exhausted"));
        }
        let key = Key::Number(self.generator);
        self.generator += 1.0;
        Ok(key)
    }

    /// Store a record, returning its key.
    ///
    /// With `no_overwrite`, an existing record under the same key is a
    /// `ConstraintError`. Unique indexes are enforced in both modes.
    pub fn put(&mut self, mut value: Value, key: Option<Key>, no_overwrite: bool) -> NativeResult<Key> {
        let key = match (self.key_path.clone(), key) {
            (Some(path), None) => match path.evaluate(&value) {
                Some(k) => k,
                None => {
                    let k = self.generate_key()?;
                    path.inject(&mut value, &k)?;
                    k
                }
            },
            (None, Some(k)) => k,
            (None, None) => self.generate_key()?,
            (Some(_), Some(_)) => {
                return Err(NativeError::data(
                    "a key was provided for a store that uses in-line keys",
                ))
            }
        };

        if no_overwrite && self.records.contains_key(&key) {
            return Err(NativeError::constraint(format!(
                "a record with key {:?} already exists",
                key
            )));
        }

        for (name, meta) in self.indexes.iter().filter(|(_, m)| m.unique) {
            for index_key in meta.keys_for(&value) {
                let clash = self.records.iter().any(|(pk, existing)| {
                    *pk != key && meta.keys_for(existing).contains(&index_key)
                });
                if clash {
                    return Err(NativeError::constraint(format!(
                        "unique index '{}' already contains {:?}",
                        name, index_key
                    )));
                }
            }
        }

        self.bump_generator(&key);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    /// Delete every record in the range.
    pub fn delete(&mut self, range: &KeyRange) {
        self.records.retain(|k, _| !range.includes(k));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records in key order, optionally restricted to a range.
    pub fn entries(&self, range: Option<&KeyRange>) -> Vec<Entry> {
        self.records
            .iter()
            .filter(|(k, _)| range.map_or(true, |r| r.includes(k)))
            .map(|(k, v)| (k.clone(), k.clone(), v.clone()))
            .collect()
    }

    /// Index rows ordered by (index key, primary key).
    pub fn index_entries(&self, meta: &IndexMeta, range: Option<&KeyRange>) -> Vec<Entry> {
        let mut rows: Vec<Entry> = self
            .records
            .iter()
            .flat_map(|(pk, value)| {
                meta.keys_for(value)
                    .into_iter()
                    .map(move |ik| (ik, pk.clone(), value.clone()))
            })
            .filter(|(ik, _, _)| range.map_or(true, |r| r.includes(ik)))
            .collect();
        rows.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        rows
    }

    /// Check that existing records satisfy a new unique index.
    pub fn check_unique(&self, meta: &IndexMeta) -> NativeResult<()> {
        if !meta.unique {
            return Ok(());
        }
        let rows = self.index_entries(meta, None);
        if rows.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(NativeError::constraint(
                "existing records violate the unique index",
            ));
        }
        Ok(())
    }
}

/// Where a cursor sits: (key, primary key).
pub type Position = (Key, Key);

/// A request to move a cursor.
#[derive(Debug, Clone, Default)]
pub struct Seek<'a> {
    pub from: Option<(&'a Key, &'a Key)>,
    pub key: Option<&'a Key>,
    pub primary_key: Option<&'a Key>,
}

/// Find the next row for a cursor moving in `direction`.
///
/// `rows` must be sorted by (key, primary key). Unique directions visit
/// each distinct key once, always on its lowest primary key.
pub fn seek(rows: &[Entry], direction: CursorDirection, seek: &Seek<'_>) -> Option<usize> {
    let forward = direction.is_forward();
    let unique = direction.is_unique();

    let passes = |row: &Entry| -> bool {
        let (k, pk) = (&row.0, &row.1);
        let past_current = match seek.from {
            None => true,
            Some((ck, cpk)) => match (forward, unique) {
                (true, false) => (k, pk) > (ck, cpk),
                (true, true) => k > ck,
                (false, false) => (k, pk) < (ck, cpk),
                (false, true) => k < ck,
            },
        };
        let reaches_target = match (seek.key, seek.primary_key) {
            (None, _) => true,
            (Some(tk), None) => {
                if forward {
                    k >= tk
                } else {
                    k <= tk
                }
            }
            (Some(tk), Some(tpk)) => {
                if forward {
                    (k, pk) >= (tk, tpk)
                } else {
                    (k, pk) <= (tk, tpk)
                }
            }
        };
        past_current && reaches_target
    };

    if forward {
        rows.iter().position(passes)
    } else {
        let last = rows.iter().rposition(passes)?;
        if unique {
            let key = &rows[last].0;
            rows.iter().position(|r| &r.0 == key)
        } else {
            Some(last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn books() -> StoreData {
        StoreData::new(&StoreOptions {
            key_path: Some(KeyPath::Single("id".into())),
            auto_increment: false,
        })
    }

    fn record(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    #[test]
    fn inline_keys_come_from_the_value() {
        let mut store = books();
        let key = store.put(record(json!({"id": 1, "title": "A"})), None, false).unwrap();
        assert_eq!(key, Key::from(1));
        assert_eq!(store.records.len(), 1);
    }

    #[test]
    fn add_refuses_duplicates() {
        let mut store = books();
        store.put(record(json!({"id": 1})), None, true).unwrap();
        let err = store.put(record(json!({"id": 1})), None, true).unwrap_err();
        assert!(err.is(awaitdb_native::ErrorName::Constraint));
        // put overwrites
        store.put(record(json!({"id": 1, "v": 2})), None, false).unwrap();
        assert_eq!(
            store.records.get(&Key::from(1)).unwrap().get_dotted("v"),
            Some(&Value::Integer(2))
        );
    }

    #[test]
    fn generator_injects_and_advances() {
        let mut store = StoreData::new(&StoreOptions {
            key_path: Some(KeyPath::Single("id".into())),
            auto_increment: true,
        });
        let k1 = store.put(record(json!({"t": "a"})), None, true).unwrap();
        let k2 = store.put(record(json!({"id": 10, "t": "b"})), None, true).unwrap();
        let k3 = store.put(record(json!({"t": "c"})), None, true).unwrap();
        assert_eq!(k1, Key::from(1));
        assert_eq!(k2, Key::from(10));
        assert_eq!(k3, Key::from(11));
        assert_eq!(
            store.records.get(&k1).unwrap().get_dotted("id"),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn write_checks() {
        let store = books();
        assert!(store.check_write(&record(json!({"id": 1})), None).is_ok());
        assert!(store
            .check_write(&record(json!({"id": 1})), Some(&Key::from(1)))
            .is_err());
        assert!(store.check_write(&record(json!({"title": "x"})), None).is_err());

        let out_of_line = StoreData::new(&StoreOptions::default());
        assert!(out_of_line.check_write(&Value::from("x"), None).is_err());
        assert!(out_of_line
            .check_write(&Value::from("x"), Some(&Key::from("k")))
            .is_ok());
    }

    #[test]
    fn unique_index_enforced() {
        let mut store = books();
        store.indexes.insert(
            "by_isbn".into(),
            IndexMeta::new(
                KeyPath::Single("isbn".into()),
                &IndexOptions {
                    unique: true,
                    multi_entry: false,
                },
            ),
        );
        store.put(record(json!({"id": 1, "isbn": "x"})), None, false).unwrap();
        // same record may be rewritten
        store.put(record(json!({"id": 1, "isbn": "x"})), None, false).unwrap();
        let err = store
            .put(record(json!({"id": 2, "isbn": "x"})), None, false)
            .unwrap_err();
        assert!(err.is(awaitdb_native::ErrorName::Constraint));
    }

    #[test]
    fn index_rows_sorted_by_index_then_primary_key() {
        let mut store = books();
        let meta = IndexMeta::new(KeyPath::Single("author".into()), &IndexOptions::default());
        store.indexes.insert("by_author".into(), meta.clone());
        store.put(record(json!({"id": 3, "author": "b"})), None, false).unwrap();
        store.put(record(json!({"id": 1, "author": "b"})), None, false).unwrap();
        store.put(record(json!({"id": 2, "author": "a"})), None, false).unwrap();
        store.put(record(json!({"id": 4})), None, false).unwrap();

        let rows = store.index_entries(&meta, None);
        let order: Vec<(Key, Key)> = rows.into_iter().map(|(k, pk, _)| (k, pk)).collect();
        assert_eq!(
            order,
            vec![
                (Key::from("a"), Key::from(2)),
                (Key::from("b"), Key::from(1)),
                (Key::from("b"), Key::from(3)),
            ]
        );
    }

    #[test]
    fn multi_entry_indexes_fan_out() {
        let meta = IndexMeta::new(
            KeyPath::Single("tags".into()),
            &IndexOptions {
                unique: false,
                multi_entry: true,
            },
        );
        let keys = meta.keys_for(&record(json!({"tags": ["b", "a", "b"]})));
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
    }

    fn rows() -> Vec<Entry> {
        vec![
            (Key::from("a"), Key::from(1), Value::Null),
            (Key::from("a"), Key::from(2), Value::Null),
            (Key::from("b"), Key::from(3), Value::Null),
            (Key::from("c"), Key::from(4), Value::Null),
        ]
    }

    #[test]
    fn seek_forward() {
        let rows = rows();
        assert_eq!(seek(&rows, CursorDirection::Next, &Seek::default()), Some(0));
        let from = (&rows[0].0, &rows[0].1);
        let s = Seek {
            from: Some(from),
            ..Seek::default()
        };
        assert_eq!(seek(&rows, CursorDirection::Next, &s), Some(1));
        assert_eq!(seek(&rows, CursorDirection::NextUnique, &s), Some(2));
    }

    #[test]
    fn seek_backward_unique_lands_on_lowest_primary_key() {
        let rows = rows();
        assert_eq!(seek(&rows, CursorDirection::Prev, &Seek::default()), Some(3));
        let from = (&rows[2].0, &rows[2].1);
        let s = Seek {
            from: Some(from),
            ..Seek::default()
        };
        assert_eq!(seek(&rows, CursorDirection::Prev, &s), Some(1));
        assert_eq!(seek(&rows, CursorDirection::PrevUnique, &s), Some(0));
    }

    #[test]
    fn seek_to_target_key() {
        let rows = rows();
        let target = Key::from("b");
        let from = (&rows[0].0, &rows[0].1);
        let s = Seek {
            from: Some(from),
            key: Some(&target),
            primary_key: None,
        };
        assert_eq!(seek(&rows, CursorDirection::Next, &s), Some(2));

        let pk = Key::from(2);
        let target = Key::from("a");
        let s = Seek {
            from: Some(from),
            key: Some(&target),
            primary_key: Some(&pk),
        };
        assert_eq!(seek(&rows, CursorDirection::Next, &s), Some(1));
    }

    #[test]
    fn seek_past_end() {
        let rows = rows();
        let from = (&rows[3].0, &rows[3].1);
        let s = Seek {
            from: Some(from),
            ..Seek::default()
        };
        assert_eq!(seek(&rows, CursorDirection::Next, &s), None);
        assert_eq!(seek(&[], CursorDirection::Next, &Seek::default()), None);
    }
}
