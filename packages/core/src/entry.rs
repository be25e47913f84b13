//! Opening and deleting databases.

use std::fmt;
use std::rc::Rc;

use awaitdb_native::{Event, EventType, NativeFactory, RawHandle};
use tracing::{debug, warn};

use crate::{Error, Handle, Promise, Wrapped, Wrapper};

/// What an `upgrade` callback gets to work with.
pub struct Upgrade {
    /// The database being upgraded.
    pub db: Handle,
    pub old_version: u64,
    pub new_version: Option<u64>,
    /// The version change transaction.
    pub transaction: Handle,
    pub event: Event,
}

type EventCallback = Rc<dyn Fn(&Event)>;

/// Callbacks for [`open`].
#[derive(Default, Clone)]
pub struct OpenOptions {
    upgrade: Option<Rc<dyn Fn(&Upgrade)>>,
    blocked: Option<EventCallback>,
    blocking: Option<EventCallback>,
    terminated: Option<Rc<dyn Fn()>>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs inside `upgradeneeded`, while the version change transaction
    /// is live. Create stores and indexes here.
    pub fn upgrade(mut self, f: impl Fn(&Upgrade) + 'static) -> Self {
        self.upgrade = Some(Rc::new(f));
        self
    }

    /// Older connections are holding up the upgrade.
    pub fn blocked(mut self, f: impl Fn(&Event) + 'static) -> Self {
        self.blocked = Some(Rc::new(f));
        self
    }

    /// The opened connection is holding up someone else's upgrade or
    /// delete.
    pub fn blocking(mut self, f: impl Fn(&Event) + 'static) -> Self {
        self.blocking = Some(Rc::new(f));
        self
    }

    /// The engine closed the opened connection on its own.
    pub fn terminated(mut self, f: impl Fn() + 'static) -> Self {
        self.terminated = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("upgrade", &self.upgrade.is_some())
            .field("blocked", &self.blocked.is_some())
            .field("blocking", &self.blocking.is_some())
            .field("terminated", &self.terminated.is_some())
            .finish()
    }
}

/// Callbacks for [`delete`].
#[derive(Default, Clone)]
pub struct DeleteOptions {
    blocked: Option<EventCallback>,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open connections are holding up the delete. The event carries the
    /// current version as `old_version`.
    pub fn blocked(mut self, f: impl Fn(&Event) + 'static) -> Self {
        self.blocked = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for DeleteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteOptions")
            .field("blocked", &self.blocked.is_some())
            .finish()
    }
}

fn on_event(request: &RawHandle, kind: EventType, callback: EventCallback) {
    let registered = request.add_listener(kind, Rc::new(move |event: &Event| callback(event)));
    if registered.is_none() {
        warn!(?request, ?kind, "request does not fire events");
    }
}

fn request_promise(wrapper: &Wrapper, request: RawHandle) -> Promise {
    match wrapper.wrap_handle(request) {
        Wrapped::Future(promise) => promise,
        _ => Promise::rejected(Error::NotAHandle {
            expected: "an open request",
        }),
    }
}

/// Open `name`, upgrading it to `version` if that is newer.
///
/// Resolves with the wrapped database once the open request succeeds.
pub fn open(
    wrapper: &Wrapper,
    factory: &dyn NativeFactory,
    name: &str,
    version: Option<u64>,
    options: OpenOptions,
) -> Promise {
    let request = match factory.open(name, version) {
        Ok(request) => request,
        Err(e) => return Promise::rejected(e),
    };
    debug!(database = name, ?version, "opening");

    if let Some(upgrade) = options.upgrade {
        let (weak, w) = (request.downgrade(), wrapper.clone());
        on_event(
            &request,
            EventType::UpgradeNeeded,
            Rc::new(move |event: &Event| {
                let Some(request) = weak.upgrade() else { return };
                let db = w.wrap(request.property("result").unwrap_or_default());
                let transaction = w.wrap(request.property("transaction").unwrap_or_default());
                match (db, transaction) {
                    (Wrapped::Handle(db), Wrapped::Handle(transaction)) => upgrade(&Upgrade {
                        db,
                        old_version: event.old_version,
                        new_version: event.new_version,
                        transaction,
                        event: event.clone(),
                    }),
                    _ => warn!(?request, "upgradeneeded without a database and transaction"),
                }
            }),
        );
    }
    if let Some(blocked) = options.blocked {
        on_event(&request, EventType::Blocked, blocked);
    }

    let promise = request_promise(wrapper, request);
    let (blocking, terminated) = (options.blocking, options.terminated);
    if blocking.is_some() || terminated.is_some() {
        promise.on_settled(move |outcome| {
            let Ok(Wrapped::Handle(db)) = outcome else { return };
            if let Some(blocking) = blocking {
                on_event(db.raw(), EventType::VersionChange, blocking);
            }
            if let Some(terminated) = terminated {
                on_event(db.raw(), EventType::Close, Rc::new(move |_: &Event| terminated()));
            }
        });
    }
    promise
}

/// Delete `name`. Resolves with [`Wrapped::Undefined`].
pub fn delete(
    wrapper: &Wrapper,
    factory: &dyn NativeFactory,
    name: &str,
    options: DeleteOptions,
) -> Promise {
    let request = match factory.delete_database(name) {
        Ok(request) => request,
        Err(e) => return Promise::rejected(e),
    };
    debug!(database = name, "deleting");
    if let Some(blocked) = options.blocked {
        on_event(&request, EventType::Blocked, blocked);
    }

    let (deleted, resolver) = Promise::channel();
    request_promise(wrapper, request)
        .on_settled(move |outcome| resolver.settle(outcome.clone().map(|_| Wrapped::Undefined)));
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, Registry};
    use awaitdb_memory::MemoryFactory;
    use awaitdb_native::{ErrorName, Value};
    use std::cell::{Cell, RefCell};

    fn with_store(store: &'static str) -> OpenOptions {
        OpenOptions::new().upgrade(move |up| {
            up.db.call("createObjectStore", args![store]).unwrap();
        })
    }

    #[test]
    fn open_runs_the_upgrade_and_resolves_with_the_database() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let seen = Rc::new(RefCell::new(None));

        let s = seen.clone();
        let options = OpenOptions::new().upgrade(move |up| {
            *s.borrow_mut() = Some((up.old_version, up.new_version));
            assert!(up.transaction.get("mode").as_str() == Some("versionchange"));
            up.db.call("createObjectStore", args!["books"]).unwrap();
        });
        let db = factory
            .run_until(open(&wrapper, &factory, "lib", Some(3), options))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();

        assert_eq!(*seen.borrow(), Some((0, Some(3))));
        assert_eq!(db.get("version").as_value(), Some(&Value::Integer(3)));
        assert_eq!(
            db.get("objectStoreNames").as_value(),
            Some(&Value::from(vec!["books"]))
        );
    }

    #[test]
    fn the_upgrade_database_is_the_opened_database() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let during: Rc<RefCell<Option<Handle>>> = Rc::default();

        let d = during.clone();
        let options = OpenOptions::new().upgrade(move |up| {
            *d.borrow_mut() = Some(up.db.clone());
        });
        let db = factory
            .run_until(open(&wrapper, &factory, "same", Some(1), options))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();
        assert!(during.borrow().as_ref().unwrap().ptr_eq(&db));
    }

    #[test]
    fn lower_versions_reject_with_the_native_error() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let db = factory
            .run_until(open(&wrapper, &factory, "v", Some(2), OpenOptions::new()))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();
        db.call("close", vec![]).unwrap();

        let err = factory
            .run_until(open(&wrapper, &factory, "v", Some(1), OpenOptions::new()))
            .unwrap()
            .unwrap_err();
        assert!(err.is(ErrorName::Version));
    }

    #[test]
    fn blocked_and_blocking_callbacks_fire() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let blocking_hits = Rc::new(Cell::new(0));
        let blocked_hits = Rc::new(Cell::new(0));

        let h = blocking_hits.clone();
        let first = factory
            .run_until(open(
                &wrapper,
                &factory,
                "shared",
                Some(1),
                with_store("a").blocking(move |event| {
                    assert_eq!(event.new_version, Some(2));
                    h.set(h.get() + 1);
                }),
            ))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();

        let h = blocked_hits.clone();
        let upgrade = open(
            &wrapper,
            &factory,
            "shared",
            Some(2),
            OpenOptions::new().blocked(move |_| h.set(h.get() + 1)),
        );
        factory.drain();
        assert_eq!(blocking_hits.get(), 1);
        assert_eq!(blocked_hits.get(), 1);
        assert!(!upgrade.is_settled());

        first.call("close", vec![]).unwrap();
        let second = factory.run_until(upgrade).unwrap().unwrap();
        assert_eq!(
            second.into_handle().unwrap().get("version").as_value(),
            Some(&Value::Integer(2))
        );
    }

    #[test]
    fn terminated_fires_on_engine_close() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let closed = Rc::new(Cell::new(false));

        let c = closed.clone();
        let _db = factory
            .run_until(open(
                &wrapper,
                &factory,
                "doomed",
                Some(1),
                OpenOptions::new().terminated(move || c.set(true)),
            ))
            .unwrap()
            .unwrap();

        factory.terminate("doomed");
        factory.drain();
        assert!(closed.get());
    }

    #[test]
    fn delete_resolves_with_nothing() {
        let factory = MemoryFactory::new();
        let wrapper = Wrapper::new(Registry::new());
        let db = factory
            .run_until(open(&wrapper, &factory, "gone", Some(1), with_store("a")))
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();

        let blocked = Rc::new(Cell::new(0u64));
        let b = blocked.clone();
        let deleting = delete(
            &wrapper,
            &factory,
            "gone",
            DeleteOptions::new().blocked(move |event| b.set(event.old_version)),
        );
        factory.drain();
        assert_eq!(blocked.get(), 1);

        db.call("close", vec![]).unwrap();
        let outcome = factory.run_until(deleting).unwrap().unwrap();
        assert!(matches!(outcome, Wrapped::Undefined));
        assert!(factory.database_names().is_empty());
    }
}
