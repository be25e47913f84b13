//! Database connections and schema changes.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use awaitdb_native::{
    decode_options, Event, EventTarget, EventType, HandleId, HandleKind, KeyPath, ListenerList,
    NativeError, NativeObject, NativeResult, RawHandle, RawValue, StoreOptions, TransactionMode,
    Value,
};
use tracing::debug;

use crate::args;
use crate::data::{DatabaseData, StoreData};
use crate::engine::Engine;
use crate::transaction::Transaction;

pub struct Connection {
    id: HandleId,
    this: Weak<Connection>,
    engine: Rc<Engine>,
    data: Rc<RefCell<DatabaseData>>,
    closed: Cell<bool>,
    upgrade: RefCell<Weak<Transaction>>,
    listeners: ListenerList,
}

impl Connection {
    pub(crate) fn new(engine: Rc<Engine>, data: Rc<RefCell<DatabaseData>>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandleId::allocate(),
            this: this.clone(),
            engine,
            data,
            closed: Cell::new(false),
            upgrade: RefCell::new(Weak::new()),
            listeners: ListenerList::new(),
        })
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RawHandle {
        RawHandle::new(self.clone())
    }

    fn strong(&self) -> NativeResult<Rc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| NativeError::invalid_state("connection has been dropped"))
    }

    pub(crate) fn engine(&self) -> &Rc<Engine> {
        &self.engine
    }

    pub(crate) fn data(&self) -> &Rc<RefCell<DatabaseData>> {
        &self.data
    }

    pub(crate) fn name(&self) -> String {
        self.data.borrow().name.clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.get()
    }

    pub(crate) fn set_upgrade(&self, tx: &Rc<Transaction>) {
        *self.upgrade.borrow_mut() = Rc::downgrade(tx);
    }

    /// The running versionchange transaction, if any.
    pub(crate) fn upgrade_transaction(&self) -> Option<Rc<Transaction>> {
        self.upgrade.borrow().upgrade().filter(|tx| !tx.is_finished())
    }

    fn require_upgrade(&self) -> NativeResult<Rc<Transaction>> {
        self.upgrade_transaction().ok_or_else(|| {
            NativeError::invalid_state("schema changes require a running version change transaction")
        })
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        self.listeners.dispatch(event);
    }

    /// Mark closed. Running transactions are allowed to finish.
    pub(crate) fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!(connection = %self.id, database = %self.name(), "connection closed");
        self.engine.connection_closed(&self.name());
    }

    fn transaction(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        if self.closed.get() {
            return Err(NativeError::invalid_state("the connection is closed"));
        }
        if self.upgrade_transaction().is_some() {
            return Err(NativeError::invalid_state(
                "a version change transaction is running",
            ));
        }
        let mut scope = args::names(args, 0)?;
        scope.sort();
        scope.dedup();
        if scope.is_empty() {
            return Err(NativeError::invalid_access(
                "a transaction needs at least one object store",
            ));
        }
        {
            let data = self.data.borrow();
            for name in &scope {
                data.store(name)?;
            }
        }
        let mode = args::parsed::<TransactionMode>(args, 1)?.unwrap_or(TransactionMode::ReadOnly);
        if mode == TransactionMode::VersionChange {
            return Err(NativeError::type_error(
                "version change transactions cannot be created directly",
            ));
        }
        let tx = Transaction::start(self.strong()?, scope, mode);
        Ok(RawValue::Handle(tx.handle()))
    }

    fn create_object_store(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        let tx = self.require_upgrade()?;
        let name = args::string(args, 0, "store name")?;
        let options: StoreOptions = decode_options(&args::value(args, 1)?)?;
        if options.auto_increment {
            match &options.key_path {
                Some(KeyPath::Multi(_)) => {
                    return Err(NativeError::invalid_access(
                        "auto-increment stores cannot use an array key path",
                    ))
                }
                Some(KeyPath::Single(p)) if p.is_empty() => {
                    return Err(NativeError::invalid_access(
                        "auto-increment stores cannot use an empty key path",
                    ))
                }
                _ => {}
            }
        }
        {
            let mut data = self.data.borrow_mut();
            if data.stores.contains_key(&name) {
                return Err(NativeError::constraint(format!(
                    "object store '{}' already exists",
                    name
                )));
            }
            data.stores.insert(name.clone(), StoreData::new(&options));
        }
        debug!(database = %self.name(), store = %name, "object store created");
        Ok(RawValue::Handle(tx.object_store(&name)?.handle()))
    }

    fn delete_object_store(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        let tx = self.require_upgrade()?;
        let name = args::string(args, 0, "store name")?;
        if self.data.borrow_mut().stores.remove(&name).is_none() {
            return Err(NativeError::not_found(format!(
                "no object store named '{}'",
                name
            )));
        }
        tx.forget_store(&name);
        debug!(database = %self.name(), store = %name, "object store deleted");
        Ok(RawValue::Undefined)
    }
}

impl NativeObject for Connection {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Database
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        match name {
            "name" => Some(RawValue::from(Value::from(self.name()))),
            "version" => Some(RawValue::from(Value::Integer(self.data.borrow().version as i64))),
            "objectStoreNames" => Some(args::names_value(self.data.borrow().store_names())),
            "transaction" | "createObjectStore" | "deleteObjectStore" | "close" => {
                args::method(HandleKind::Database, name)
            }
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        match method {
            "transaction" => self.transaction(&args),
            "createObjectStore" => self.create_object_store(&args),
            "deleteObjectStore" => self.delete_object_store(&args),
            "close" => {
                self.close();
                Ok(RawValue::Undefined)
            }
            other => Err(NativeError::type_error(format!(
                "Database.{} is not a function",
                other
            ))),
        }
    }

    fn events(&self) -> Option<&dyn EventTarget> {
        Some(&self.listeners)
    }
}

/// Fire a version change notice at a connection.
pub(crate) fn notify_version_change(connection: &Connection, old: u64, new: Option<u64>) {
    connection.dispatch(&Event::version(EventType::VersionChange, old, new));
}
