//! Object store and index handles.
//!
//! Both are thin views bound to a transaction and a name; the records
//! themselves live in [`DatabaseData`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use awaitdb_native::{
    decode_options, CursorDirection, HandleId, HandleKind, IndexOptions, KeyPath, KeyRange,
    NativeError, NativeObject, NativeResult, RawHandle, RawValue, Value,
};
use tracing::debug;

use crate::args;
use crate::cursor::Cursor;
use crate::data::{DatabaseData, Entry, IndexMeta};
use crate::request::Request;
use crate::transaction::{Operation, Transaction};

/// What a read or a cursor walks over.
#[derive(Debug, Clone)]
pub(crate) enum Source {
    Store { store: String },
    Index { store: String, index: String },
}

impl Source {
    pub(crate) fn store_name(&self) -> &str {
        match self {
            Source::Store { store } | Source::Index { store, .. } => store,
        }
    }

    pub(crate) fn is_index(&self) -> bool {
        matches!(self, Source::Index { .. })
    }

    /// Rows in iteration order: by key, then primary key.
    pub(crate) fn rows(&self, data: &DatabaseData, range: Option<&KeyRange>) -> NativeResult<Vec<Entry>> {
        match self {
            Source::Store { store } => Ok(data.store(store)?.entries(range)),
            Source::Index { store, index } => {
                let store = data.store(store)?;
                Ok(store.index_entries(store.index(index)?, range))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Read {
    Get,
    GetKey,
    GetAll,
    GetAllKeys,
    Count,
}

impl Read {
    fn parse(name: &str) -> Option<Read> {
        match name {
            "get" => Some(Read::Get),
            "getKey" => Some(Read::GetKey),
            "getAll" => Some(Read::GetAll),
            "getAllKeys" => Some(Read::GetAllKeys),
            "count" => Some(Read::Count),
            _ => None,
        }
    }

    fn operation(self, source: Source, args: &[RawValue]) -> NativeResult<Operation> {
        let (range, limit) = match self {
            Read::Get | Read::GetKey => (Some(args::required_query(args, 0)?), Some(1)),
            Read::GetAll | Read::GetAllKeys => (args::query(args, 0)?, args::count(args, 1)?),
            Read::Count => (args::query(args, 0)?, None),
        };
        Ok(Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
            let rows = tx.with_data(|data| source.rows(data, range.as_ref()))?;
            let rows = rows.into_iter().take(limit.unwrap_or(usize::MAX));
            Ok(match self {
                Read::Get => rows
                    .map(|(_, _, v)| RawValue::Data(v))
                    .next()
                    .unwrap_or_default(),
                Read::GetKey => rows
                    .map(|(_, pk, _)| RawValue::Data(pk.to_value()))
                    .next()
                    .unwrap_or_default(),
                Read::GetAll => RawValue::Data(Value::Array(rows.map(|(_, _, v)| v).collect())),
                Read::GetAllKeys => {
                    RawValue::Data(Value::Array(rows.map(|(_, pk, _)| pk.to_value()).collect()))
                }
                Read::Count => RawValue::Data(Value::Integer(rows.count() as i64)),
            })
        }))
    }
}

fn open_cursor(
    tx: &Transaction,
    handle: RawHandle,
    source: Source,
    args: &[RawValue],
    with_value: bool,
) -> NativeResult<RawValue> {
    let range = args::query(args, 0)?;
    let direction = args::parsed::<CursorDirection>(args, 1)?.unwrap_or_default();
    let source_handle = handle.clone();
    tx.request(
        handle,
        Box::new(move |tx: &Rc<Transaction>, request: &Rc<Request>| {
            let cursor = Cursor::new(
                tx.clone(),
                request.clone(),
                source,
                source_handle,
                direction,
                range,
                with_value,
            );
            tx.track_cursor(&cursor);
            cursor.step(1, None, None)
        }),
    )
}

pub struct ObjectStore {
    id: HandleId,
    this: Weak<ObjectStore>,
    tx: Rc<Transaction>,
    name: String,
    indexes: RefCell<HashMap<String, Rc<Index>>>,
}

impl ObjectStore {
    pub(crate) fn new(tx: Rc<Transaction>, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandleId::allocate(),
            this: this.clone(),
            tx,
            name: name.to_string(),
            indexes: RefCell::new(HashMap::new()),
        })
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RawHandle {
        RawHandle::new(self.clone())
    }

    fn raw(&self) -> NativeResult<RawHandle> {
        self.this
            .upgrade()
            .map(|s| RawHandle::new(s))
            .ok_or_else(|| NativeError::invalid_state("object store has been dropped"))
    }

    fn source(&self) -> Source {
        Source::Store {
            store: self.name.clone(),
        }
    }

    /// Drop cached index handles once the transaction is over.
    pub(crate) fn release(&self) {
        self.indexes.borrow_mut().clear();
    }

    fn with_store<T>(&self, f: impl FnOnce(&crate::data::StoreData) -> NativeResult<T>) -> NativeResult<T> {
        self.tx.with_data(|data| f(data.store(&self.name)?))
    }

    fn index(&self, name: &str) -> NativeResult<Rc<Index>> {
        if self.tx.is_finished() {
            return Err(NativeError::invalid_state("the transaction has finished"));
        }
        self.with_store(|s| s.index(name).map(|_| ()))?;
        if let Some(index) = self.indexes.borrow().get(name) {
            return Ok(index.clone());
        }
        let store = self
            .this
            .upgrade()
            .ok_or_else(|| NativeError::invalid_state("object store has been dropped"))?;
        let index = Index::new(store, name);
        self.indexes.borrow_mut().insert(name.to_string(), index.clone());
        Ok(index)
    }

    fn write(&self, args: &[RawValue], no_overwrite: bool) -> NativeResult<RawValue> {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        let value = args::value(args, 0)?;
        let key = args::optional_key(args, 1)?;
        self.with_store(|s| s.check_write(&value, key.as_ref()))?;
        let name = self.name.clone();
        self.tx.request(
            self.raw()?,
            Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
                let key = tx.with_data_mut(|data| data.store_mut(&name)?.put(value, key, no_overwrite))?;
                Ok(RawValue::Data(key.to_value()))
            }),
        )
    }

    fn delete(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        let range = args::required_query(args, 0)?;
        let name = self.name.clone();
        self.tx.request(
            self.raw()?,
            Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
                tx.with_data_mut(|data| {
                    data.store_mut(&name)?.delete(&range);
                    Ok(RawValue::Undefined)
                })
            }),
        )
    }

    fn clear(&self) -> NativeResult<RawValue> {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        let name = self.name.clone();
        self.tx.request(
            self.raw()?,
            Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
                tx.with_data_mut(|data| {
                    data.store_mut(&name)?.clear();
                    Ok(RawValue::Undefined)
                })
            }),
        )
    }

    fn create_index(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        if self.tx.mode() != awaitdb_native::TransactionMode::VersionChange || self.tx.is_finished() {
            return Err(NativeError::invalid_state(
                "indexes can only be created during a version change",
            ));
        }
        let name = args::string(args, 0, "index name")?;
        let key_path = KeyPath::from_value(&args::value(args, 1)?)?;
        let options: IndexOptions = decode_options(&args::value(args, 2)?)?;
        if options.multi_entry && matches!(key_path, KeyPath::Multi(_)) {
            return Err(NativeError::invalid_access(
                "multi-entry indexes cannot use an array key path",
            ));
        }
        let meta = IndexMeta::new(key_path, &options);
        self.tx.with_data_mut(|data| {
            let store = data.store_mut(&self.name)?;
            if store.indexes.contains_key(&name) {
                return Err(NativeError::constraint(format!(
                    "index '{}' already exists",
                    name
                )));
            }
            store.check_unique(&meta)?;
            store.indexes.insert(name.clone(), meta);
            Ok(())
        })?;
        debug!(store = %self.name, index = %name, "index created");
        Ok(RawValue::Handle(self.index(&name)?.handle()))
    }

    fn delete_index(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        if self.tx.mode() != awaitdb_native::TransactionMode::VersionChange || self.tx.is_finished() {
            return Err(NativeError::invalid_state(
                "indexes can only be deleted during a version change",
            ));
        }
        let name = args::string(args, 0, "index name")?;
        self.tx.with_data_mut(|data| {
            data.store_mut(&self.name)?
                .indexes
                .remove(&name)
                .map(|_| ())
                .ok_or_else(|| NativeError::not_found(format!("no index named '{}'", name)))
        })?;
        self.indexes.borrow_mut().remove(&name);
        Ok(RawValue::Undefined)
    }
}

const STORE_METHODS: &[&str] = &[
    "get",
    "getKey",
    "getAll",
    "getAllKeys",
    "count",
    "put",
    "add",
    "delete",
    "clear",
    "openCursor",
    "openKeyCursor",
    "index",
    "createIndex",
    "deleteIndex",
];

impl NativeObject for ObjectStore {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        HandleKind::ObjectStore
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        match name {
            "name" => Some(RawValue::from(self.name.as_str())),
            "keyPath" => self
                .with_store(|s| Ok(s.key_path.as_ref().map(KeyPath::to_value).unwrap_or_default()))
                .ok()
                .map(RawValue::Data),
            "autoIncrement" => self
                .with_store(|s| Ok(Value::Bool(s.auto_increment)))
                .ok()
                .map(RawValue::Data),
            "indexNames" => self
                .with_store(|s| Ok(s.indexes.keys().cloned().collect::<Vec<_>>()))
                .ok()
                .map(args::names_value),
            "transaction" => Some(RawValue::Handle(self.tx.handle())),
            m if STORE_METHODS.contains(&m) => args::method(HandleKind::ObjectStore, m),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        if let Some(read) = Read::parse(method) {
            self.tx.check_active()?;
            self.with_store(|_| Ok(()))?;
            let op = read.operation(self.source(), &args)?;
            return self.tx.request(self.raw()?, op);
        }
        match method {
            "put" => self.write(&args, false),
            "add" => self.write(&args, true),
            "delete" => self.delete(&args),
            "clear" => self.clear(),
            "openCursor" | "openKeyCursor" => {
                self.tx.check_active()?;
                self.with_store(|_| Ok(()))?;
                open_cursor(&self.tx, self.raw()?, self.source(), &args, method == "openCursor")
            }
            "index" => {
                let name = args::string(&args, 0, "index name")?;
                Ok(RawValue::Handle(self.index(&name)?.handle()))
            }
            "createIndex" => self.create_index(&args),
            "deleteIndex" => self.delete_index(&args),
            other => Err(NativeError::type_error(format!(
                "ObjectStore.{} is not a function",
                other
            ))),
        }
    }
}

pub struct Index {
    id: HandleId,
    this: Weak<Index>,
    store: Rc<ObjectStore>,
    name: String,
}

impl Index {
    fn new(store: Rc<ObjectStore>, name: &str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandleId::allocate(),
            this: this.clone(),
            store,
            name: name.to_string(),
        })
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RawHandle {
        RawHandle::new(self.clone())
    }

    fn raw(&self) -> NativeResult<RawHandle> {
        self.this
            .upgrade()
            .map(|s| RawHandle::new(s))
            .ok_or_else(|| NativeError::invalid_state("index has been dropped"))
    }

    fn source(&self) -> Source {
        Source::Index {
            store: self.store.name.clone(),
            index: self.name.clone(),
        }
    }

    fn meta(&self) -> NativeResult<IndexMeta> {
        self.store.with_store(|s| s.index(&self.name).cloned())
    }
}

const INDEX_METHODS: &[&str] = &[
    "get",
    "getKey",
    "getAll",
    "getAllKeys",
    "count",
    "openCursor",
    "openKeyCursor",
];

impl NativeObject for Index {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Index
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        match name {
            "name" => Some(RawValue::from(self.name.as_str())),
            "keyPath" => self.meta().ok().map(|m| RawValue::Data(m.key_path.to_value())),
            "unique" => self.meta().ok().map(|m| RawValue::Data(Value::Bool(m.unique))),
            "multiEntry" => self
                .meta()
                .ok()
                .map(|m| RawValue::Data(Value::Bool(m.multi_entry))),
            "objectStore" => Some(RawValue::Handle(self.store.handle())),
            m if INDEX_METHODS.contains(&m) => args::method(HandleKind::Index, m),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        let tx = &self.store.tx;
        tx.check_active()?;
        self.meta()?;
        if let Some(read) = Read::parse(method) {
            let op = read.operation(self.source(), &args)?;
            return tx.request(self.raw()?, op);
        }
        match method {
            "openCursor" | "openKeyCursor" => {
                open_cursor(tx, self.raw()?, self.source(), &args, method == "openCursor")
            }
            other => Err(NativeError::type_error(format!(
                "Index.{} is not a function",
                other
            ))),
        }
    }
}
