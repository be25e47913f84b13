//! Engine-wide state: databases, connections, transaction ordering, and
//! the open/delete algorithms.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use awaitdb_native::{
    Event, EventType, NativeError, NativeResult, RawValue, TransactionMode,
};
use tracing::{debug, info};

use crate::connection::{notify_version_change, Connection};
use crate::data::DatabaseData;
use crate::event_loop::EventLoop;
use crate::request::Request;
use crate::transaction::Transaction;

/// An open or delete that is waiting for other connections.
struct Parked {
    request: Rc<Request>,
    name: String,
    action: Action,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Open { old: u64, new: u64 },
    Delete { old: u64 },
}

#[derive(Default)]
pub(crate) struct Engine {
    event_loop: EventLoop,
    databases: RefCell<HashMap<String, Rc<RefCell<DatabaseData>>>>,
    connections: RefCell<Vec<Weak<Connection>>>,
    transactions: RefCell<Vec<Rc<Transaction>>>,
    parked: RefCell<Vec<Parked>>,
}

impl Engine {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub(crate) fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn version_of(&self, name: &str) -> Option<u64> {
        self.databases.borrow().get(name).map(|d| d.borrow().version)
    }

    fn open_connections(&self, name: &str) -> Vec<Rc<Connection>> {
        self.connections.borrow_mut().retain(|c| c.strong_count() > 0);
        self.connections
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| c.is_open() && c.name() == name)
            .collect()
    }

    fn has_running_transactions(&self, name: &str) -> bool {
        self.transactions
            .borrow()
            .iter()
            .any(|tx| tx.connection().name() == name)
    }

    // -- transactions ------------------------------------------------------

    pub(crate) fn register_transaction(&self, tx: &Rc<Transaction>) {
        self.transactions.borrow_mut().push(tx.clone());
    }

    /// Whether an earlier, overlapping transaction is still unfinished.
    pub(crate) fn is_blocked(&self, tx: &Rc<Transaction>) -> bool {
        let txs = self.transactions.borrow();
        txs.iter()
            .take_while(|other| !Rc::ptr_eq(other, tx))
            .any(|other| !other.is_finished() && tx.conflicts_with(other))
    }

    pub(crate) fn transaction_finished(self: &Rc<Self>, tx: &Rc<Transaction>) {
        self.transactions.borrow_mut().retain(|t| !Rc::ptr_eq(t, tx));
        let waiting: Vec<Rc<Transaction>> = self
            .transactions
            .borrow()
            .iter()
            .filter(|t| !t.is_started())
            .cloned()
            .collect();
        for t in waiting {
            t.schedule_pump();
        }
        self.schedule_retry(&tx.connection().name());
    }

    // -- open --------------------------------------------------------------

    pub(crate) fn open(self: &Rc<Self>, name: &str, version: Option<u64>) -> NativeResult<Rc<Request>> {
        if version == Some(0) {
            return Err(NativeError::type_error("version must be at least 1"));
        }
        let request = Request::open();
        let engine = self.clone();
        let (req, name) = (request.clone(), name.to_string());
        self.event_loop.schedule("open database", move || {
            engine.process_open(req, name, version);
        });
        Ok(request)
    }

    fn process_open(self: &Rc<Self>, request: Rc<Request>, name: String, version: Option<u64>) {
        let current = self.version_of(&name).unwrap_or(0);
        let requested = version.unwrap_or(current.max(1));
        if requested < current {
            debug!(database = %name, requested, current, "open rejected: version too low");
            request.fail(NativeError::version(format!(
                "requested version {} is lower than the existing version {}",
                requested, current
            )));
            return;
        }
        if self.upgrade_in_progress(&name) {
            self.park(request, name, Action::Open { old: current, new: requested });
            return;
        }
        if requested == current {
            let data = match self.databases.borrow().get(&name) {
                Some(d) => d.clone(),
                None => return,
            };
            let connection = self.connect(data);
            debug!(database = %name, version = current, "database opened");
            request.succeed(RawValue::Handle(connection.handle()));
            return;
        }

        for other in self.open_connections(&name) {
            notify_version_change(&other, current, Some(requested));
        }
        if !self.open_connections(&name).is_empty() {
            debug!(database = %name, "upgrade blocked by open connections");
            request.dispatch(&Event::version(EventType::Blocked, current, Some(requested)));
            self.park(request, name, Action::Open { old: current, new: requested });
            return;
        }
        if self.has_running_transactions(&name) {
            self.park(request, name, Action::Open { old: current, new: requested });
            return;
        }
        self.run_upgrade(request, name, current, requested);
    }

    fn upgrade_in_progress(&self, name: &str) -> bool {
        self.transactions
            .borrow()
            .iter()
            .any(|tx| tx.mode() == TransactionMode::VersionChange && tx.connection().name() == name)
    }

    fn connect(self: &Rc<Self>, data: Rc<RefCell<DatabaseData>>) -> Rc<Connection> {
        let connection = Connection::new(self.clone(), data);
        self.connections.borrow_mut().push(Rc::downgrade(&connection));
        connection
    }

    fn run_upgrade(self: &Rc<Self>, request: Rc<Request>, name: String, old: u64, new: u64) {
        let existed = self.databases.borrow().contains_key(&name);
        let data = self
            .databases
            .borrow_mut()
            .entry(name.clone())
            .or_insert_with(|| Rc::new(RefCell::new(DatabaseData::new(&name))))
            .clone();
        let before = data.borrow().clone();
        data.borrow_mut().version = new;

        let connection = self.connect(data);
        let tx = Transaction::start(connection.clone(), Vec::new(), TransactionMode::VersionChange);
        tx.begin_with(before);
        connection.set_upgrade(&tx);
        info!(database = %name, old, new, "upgrading database");

        let engine = self.clone();
        let (req, conn) = (request.clone(), connection.clone());
        tx.set_finish_hook(Box::new(move |outcome| {
            req.set_transaction(None);
            match outcome {
                None => {
                    debug!(database = %conn.name(), "upgrade committed");
                    req.succeed(RawValue::Handle(conn.handle()));
                }
                Some(error) => {
                    debug!(database = %conn.name(), %error, "upgrade aborted");
                    if !existed {
                        engine.databases.borrow_mut().remove(&conn.name());
                    }
                    conn.close();
                    req.fail(NativeError::abort(format!(
                        "the version change was aborted: {}",
                        error
                    )));
                }
            }
        }));

        request.set_result(RawValue::Handle(connection.handle()));
        request.set_transaction(Some(tx));
        request.dispatch(&Event::version(EventType::UpgradeNeeded, old, Some(new)));
    }

    // -- delete ------------------------------------------------------------

    pub(crate) fn delete_database(self: &Rc<Self>, name: &str) -> Rc<Request> {
        let request = Request::open();
        let engine = self.clone();
        let (req, name) = (request.clone(), name.to_string());
        self.event_loop.schedule("delete database", move || {
            engine.process_delete(req, name);
        });
        request
    }

    fn process_delete(self: &Rc<Self>, request: Rc<Request>, name: String) {
        let old = self.version_of(&name).unwrap_or(0);
        if self.upgrade_in_progress(&name) {
            self.park(request, name, Action::Delete { old });
            return;
        }
        for other in self.open_connections(&name) {
            notify_version_change(&other, old, None);
        }
        if !self.open_connections(&name).is_empty() {
            debug!(database = %name, "delete blocked by open connections");
            request.dispatch(&Event::version(EventType::Blocked, old, None));
            self.park(request, name, Action::Delete { old });
            return;
        }
        if self.has_running_transactions(&name) {
            self.park(request, name, Action::Delete { old });
            return;
        }
        self.run_delete(request, name, old);
    }

    fn run_delete(&self, request: Rc<Request>, name: String, old: u64) {
        self.databases.borrow_mut().remove(&name);
        info!(database = %name, old, "database deleted");
        request.succeed(RawValue::Undefined);
    }

    // -- waiting -----------------------------------------------------------

    fn park(&self, request: Rc<Request>, name: String, action: Action) {
        self.parked.borrow_mut().push(Parked { request, name, action });
    }

    pub(crate) fn connection_closed(self: &Rc<Self>, name: &str) {
        self.schedule_retry(name);
    }

    fn schedule_retry(self: &Rc<Self>, name: &str) {
        if !self.parked.borrow().iter().any(|p| p.name == name) {
            return;
        }
        let engine = self.clone();
        let name = name.to_string();
        self.event_loop.schedule("retry waiting open", move || engine.retry(&name));
    }

    /// Re-run the first parked open/delete for `name` if nothing blocks it.
    fn retry(self: &Rc<Self>, name: &str) {
        let next = {
            let mut parked = self.parked.borrow_mut();
            parked
                .iter()
                .position(|p| p.name == name)
                .map(|i| parked.remove(i))
        };
        let Some(Parked { request, name, action }) = next else {
            return;
        };
        let current = self.version_of(&name).unwrap_or(0);
        let needs_exclusive = match action {
            Action::Open { old, new } => current == old && new > current,
            Action::Delete { .. } => true,
        };
        if needs_exclusive
            && (self.upgrade_in_progress(&name)
                || !self.open_connections(&name).is_empty()
                || self.has_running_transactions(&name))
        {
            self.parked.borrow_mut().insert(0, Parked { request, name, action });
            return;
        }
        match action {
            Action::Open { old, new } if needs_exclusive => {
                self.run_upgrade(request, name.clone(), old, new)
            }
            // The database changed while we waited; start over.
            Action::Open { new, .. } => self.process_open(request, name.clone(), Some(new)),
            Action::Delete { .. } => self.run_delete(request, name.clone(), current),
        }
        self.schedule_retry(&name);
    }

    /// Close every connection to `name` as if the engine lost the database.
    pub(crate) fn terminate(self: &Rc<Self>, name: &str) {
        let victims = self.open_connections(name);
        let running: Vec<Rc<Transaction>> = self
            .transactions
            .borrow()
            .iter()
            .filter(|tx| tx.connection().name() == name)
            .cloned()
            .collect();
        for tx in running {
            tx.abort_with(Some(NativeError::abort("the connection was closed by the engine")));
        }
        for connection in victims {
            info!(database = %name, "connection terminated");
            connection.close();
            self.event_loop.schedule("connection terminated", move || {
                connection.dispatch(&Event::new(EventType::Close));
            });
        }
    }
}
