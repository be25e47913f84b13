//! Transactions: request queues, auto-commit and rollback.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};

use awaitdb_native::{
    Event, EventTarget, EventType, HandleId, HandleKind, ListenerList, NativeError, NativeObject,
    NativeResult, RawHandle, RawValue, TransactionMode, Value,
};
use tracing::{debug, trace};

use crate::args;
use crate::connection::Connection;
use crate::cursor::Cursor;
use crate::data::{DatabaseData, StoreData};
use crate::engine::Engine;
use crate::request::Request;
use crate::store::ObjectStore;

/// The work a queued request performs when its turn comes.
pub(crate) type Operation = Box<dyn FnOnce(&Rc<Transaction>, &Rc<Request>) -> NativeResult<RawValue>>;

struct Queued {
    request: Rc<Request>,
    op: Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Created; waiting for overlapping transactions to finish.
    Waiting,
    Running,
    Finished,
}

enum Snapshot {
    Stores(BTreeMap<String, StoreData>),
    Database(DatabaseData),
}

/// Callback run once the transaction has committed (`None`) or aborted.
pub(crate) type FinishHook = Box<dyn FnOnce(Option<NativeError>)>;

pub struct Transaction {
    id: HandleId,
    this: Weak<Transaction>,
    connection: Rc<Connection>,
    scope: Vec<String>,
    mode: TransactionMode,
    state: Cell<State>,
    commit_requested: Cell<bool>,
    pump_scheduled: Cell<bool>,
    queue: RefCell<VecDeque<Queued>>,
    snapshot: RefCell<Option<Snapshot>>,
    error: RefCell<Option<NativeError>>,
    stores: RefCell<HashMap<String, Rc<ObjectStore>>>,
    cursors: RefCell<Vec<Weak<Cursor>>>,
    on_finish: RefCell<Option<FinishHook>>,
    listeners: ListenerList,
}

impl Transaction {
    /// Create and register a transaction. Versionchange transactions cover
    /// every store, so their `scope` is ignored.
    pub(crate) fn start(
        connection: Rc<Connection>,
        scope: Vec<String>,
        mode: TransactionMode,
    ) -> Rc<Self> {
        let tx = Rc::new_cyclic(|this| Self {
            id: HandleId::allocate(),
            this: this.clone(),
            connection,
            scope,
            mode,
            state: Cell::new(State::Waiting),
            commit_requested: Cell::new(false),
            pump_scheduled: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
            snapshot: RefCell::new(None),
            error: RefCell::new(None),
            stores: RefCell::new(HashMap::new()),
            cursors: RefCell::new(Vec::new()),
            on_finish: RefCell::new(None),
            listeners: ListenerList::new(),
        });
        debug!(tx = %tx.id, mode = %mode, scope = ?tx.scope, "transaction created");
        tx.engine().register_transaction(&tx);
        tx.schedule_pump();
        tx
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RawHandle {
        RawHandle::new(self.clone())
    }

    fn strong(&self) -> NativeResult<Rc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| NativeError::invalid_state("transaction has been dropped"))
    }

    pub(crate) fn engine(&self) -> &Rc<Engine> {
        self.connection.engine()
    }

    pub(crate) fn connection(&self) -> &Rc<Connection> {
        &self.connection
    }

    pub(crate) fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.state.get() == State::Finished
    }

    pub(crate) fn is_started(&self) -> bool {
        self.state.get() != State::Waiting
    }

    pub(crate) fn set_finish_hook(&self, hook: FinishHook) {
        *self.on_finish.borrow_mut() = Some(hook);
    }

    /// Store names this transaction may touch.
    pub(crate) fn scope(&self) -> Vec<String> {
        if self.mode == TransactionMode::VersionChange {
            self.connection.data().borrow().store_names()
        } else {
            self.scope.clone()
        }
    }

    /// Whether two transactions on the same database must not overlap.
    pub(crate) fn conflicts_with(&self, other: &Transaction) -> bool {
        if !Rc::ptr_eq(self.connection.data(), other.connection.data()) {
            return false;
        }
        if self.mode == TransactionMode::VersionChange || other.mode == TransactionMode::VersionChange {
            return true;
        }
        if !self.mode.is_write() && !other.mode.is_write() {
            return false;
        }
        self.scope.iter().any(|s| other.scope.contains(s))
    }

    pub(crate) fn with_data<T>(&self, f: impl FnOnce(&DatabaseData) -> NativeResult<T>) -> NativeResult<T> {
        f(&self.connection.data().borrow())
    }

    pub(crate) fn with_data_mut<T>(
        &self,
        f: impl FnOnce(&mut DatabaseData) -> NativeResult<T>,
    ) -> NativeResult<T> {
        f(&mut self.connection.data().borrow_mut())
    }

    pub(crate) fn check_active(&self) -> NativeResult<()> {
        if self.is_finished() || self.commit_requested.get() {
            return Err(NativeError::inactive(format!(
                "transaction {} is not active",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn check_writable(&self) -> NativeResult<()> {
        if !self.mode.is_write() {
            return Err(NativeError::read_only(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        Ok(())
    }

    /// The store handle for `name`; the same object for the life of the
    /// transaction.
    pub(crate) fn object_store(&self, name: &str) -> NativeResult<Rc<ObjectStore>> {
        if self.is_finished() {
            return Err(NativeError::invalid_state(format!(
                "transaction {} has finished",
                self.id
            )));
        }
        if !self.scope().iter().any(|s| s == name) {
            return Err(NativeError::not_found(format!(
                "object store '{}' is not in the transaction's scope",
                name
            )));
        }
        if let Some(store) = self.stores.borrow().get(name) {
            return Ok(store.clone());
        }
        let store = ObjectStore::new(self.strong()?, name);
        self.stores.borrow_mut().insert(name.to_string(), store.clone());
        Ok(store)
    }

    pub(crate) fn forget_store(&self, name: &str) {
        self.stores.borrow_mut().remove(name);
    }

    pub(crate) fn track_cursor(&self, cursor: &Rc<Cursor>) {
        self.cursors.borrow_mut().push(Rc::downgrade(cursor));
    }

    /// Queue a new request against `source`.
    pub(crate) fn request(&self, source: RawHandle, op: Operation) -> NativeResult<RawValue> {
        self.check_active()?;
        let request = Request::new(Some(source), Some(self.strong()?));
        self.enqueue(request.clone(), op)?;
        Ok(RawValue::Handle(request.handle()))
    }

    /// Queue `op` on an existing request.
    pub(crate) fn enqueue(&self, request: Rc<Request>, op: Operation) -> NativeResult<()> {
        self.check_active()?;
        trace!(tx = %self.id, request = %request.id(), "request queued");
        self.queue.borrow_mut().push_back(Queued { request, op });
        self.strong()?.schedule_pump();
        Ok(())
    }

    pub(crate) fn schedule_pump(self: &Rc<Self>) {
        if self.is_finished() || self.pump_scheduled.replace(true) {
            return;
        }
        let tx = self.clone();
        self.engine().event_loop().schedule("transaction step", move || {
            tx.pump_scheduled.set(false);
            tx.pump();
        });
    }

    /// Run the next queued request, or commit if there is none.
    fn pump(self: &Rc<Self>) {
        if self.is_finished() {
            return;
        }
        if self.state.get() == State::Waiting {
            if self.engine().is_blocked(self) {
                trace!(tx = %self.id, "waiting on overlapping transaction");
                return;
            }
            self.begin();
        }

        let next = self.queue.borrow_mut().pop_front();
        match next {
            Some(Queued { request, op }) => {
                match op(self, &request) {
                    Ok(result) => request.succeed(result),
                    Err(error) => {
                        debug!(tx = %self.id, request = %request.id(), %error, "request failed");
                        request.fail(error.clone());
                        self.abort_with(Some(error));
                    }
                }
                self.schedule_pump();
            }
            None => self.commit(),
        }
    }

    fn begin(&self) {
        self.state.set(State::Running);
        let data = self.connection.data().borrow();
        let snapshot = match self.mode {
            TransactionMode::ReadOnly => None,
            TransactionMode::ReadWrite => Some(Snapshot::Stores(
                self.scope
                    .iter()
                    .filter_map(|n| data.stores.get(n).map(|s| (n.clone(), s.clone())))
                    .collect(),
            )),
            TransactionMode::VersionChange => Some(Snapshot::Database((*data).clone())),
        };
        *self.snapshot.borrow_mut() = snapshot;
        debug!(tx = %self.id, "transaction started");
    }

    /// Take a snapshot now rather than when the first step runs.
    ///
    /// Versionchange transactions change the schema before their first
    /// step, so the pre-upgrade state has to be captured up front.
    pub(crate) fn begin_with(&self, before: DatabaseData) {
        self.state.set(State::Running);
        *self.snapshot.borrow_mut() = Some(Snapshot::Database(before));
    }

    fn commit(self: &Rc<Self>) {
        self.state.set(State::Finished);
        self.snapshot.borrow_mut().take();
        debug!(tx = %self.id, "transaction committed");
        self.listeners.dispatch(&Event::new(EventType::Complete));
        self.finish(None);
    }

    fn rollback(&self) {
        let snapshot = self.snapshot.borrow_mut().take();
        let mut data = self.connection.data().borrow_mut();
        match snapshot {
            Some(Snapshot::Stores(stores)) => {
                for (name, store) in stores {
                    data.stores.insert(name, store);
                }
            }
            Some(Snapshot::Database(before)) => *data = before,
            None => {}
        }
    }

    /// Abort, optionally recording the error that caused it.
    ///
    /// Rollback happens immediately; pending requests fail and the
    /// `error`/`abort` events fire from a later task.
    pub(crate) fn abort_with(self: &Rc<Self>, error: Option<NativeError>) {
        if self.is_finished() {
            return;
        }
        self.state.set(State::Finished);
        *self.error.borrow_mut() = error.clone();
        self.rollback();
        let pending: Vec<Queued> = self.queue.borrow_mut().drain(..).collect();
        debug!(tx = %self.id, error = ?error, pending = pending.len(), "transaction aborted");

        let tx = self.clone();
        self.engine().event_loop().schedule("transaction abort", move || {
            for queued in pending {
                queued
                    .request
                    .fail(NativeError::abort("the transaction was aborted"));
            }
            if error.is_some() {
                tx.listeners.dispatch(&Event::new(EventType::Error));
            }
            tx.listeners.dispatch(&Event::new(EventType::Abort));
            let cause = error.unwrap_or_else(|| NativeError::abort("the transaction was aborted"));
            tx.finish(Some(cause));
        });
    }

    fn finish(self: &Rc<Self>, outcome: Option<NativeError>) {
        // Break handle cycles; a finished transaction serves no new requests.
        let stores: Vec<Rc<ObjectStore>> = self.stores.borrow_mut().drain().map(|(_, s)| s).collect();
        for store in stores {
            store.release();
        }
        for cursor in self.cursors.borrow_mut().drain(..) {
            if let Some(cursor) = cursor.upgrade() {
                cursor.release();
            }
        }
        self.engine().transaction_finished(self);
        let hook = self.on_finish.borrow_mut().take();
        if let Some(hook) = hook {
            hook(outcome);
        }
    }
}

impl NativeObject for Transaction {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        HandleKind::Transaction
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        match name {
            "mode" => Some(RawValue::from(self.mode.as_str())),
            "objectStoreNames" => Some(args::names_value(self.scope())),
            "db" => Some(RawValue::Handle(self.connection.handle())),
            "error" => Some(match self.error.borrow().clone() {
                Some(e) => RawValue::Error(e),
                None => RawValue::Data(Value::Null),
            }),
            "objectStore" | "abort" | "commit" => args::method(HandleKind::Transaction, name),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        match method {
            "objectStore" => {
                let name = args::string(&args, 0, "store name")?;
                Ok(RawValue::Handle(self.object_store(&name)?.handle()))
            }
            "abort" => {
                if self.is_finished() {
                    return Err(NativeError::invalid_state("transaction has already finished"));
                }
                self.strong()?.abort_with(None);
                Ok(RawValue::Undefined)
            }
            "commit" => {
                if self.is_finished() {
                    return Err(NativeError::invalid_state("transaction has already finished"));
                }
                self.commit_requested.set(true);
                self.strong()?.schedule_pump();
                Ok(RawValue::Undefined)
            }
            other => Err(NativeError::type_error(format!(
                "Transaction.{} is not a function",
                other
            ))),
        }
    }

    fn events(&self) -> Option<&dyn EventTarget> {
        Some(&self.listeners)
    }

    fn error(&self) -> Option<NativeError> {
        self.error.borrow().clone()
    }
}
