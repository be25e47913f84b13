//! End-to-end scenarios against the in-memory engine.

use std::cell::RefCell;
use std::rc::Rc;

use awaitdb::{
    args, AwaitDb, DeleteOptions, Event, EventType, Handle, HandleKind, HookSet, OpenOptions,
    RawValue, Value, Wrapped,
};
use awaitdb_memory::MemoryFactory;
use collection_literals::btree;
use serde_json::json;

fn library(factory: &MemoryFactory) -> (AwaitDb, Handle) {
    let awaitdb = AwaitDb::new(factory.clone());
    let options = OpenOptions::new().upgrade(|up| {
        let store = up
            .db
            .call(
                "createObjectStore",
                args!["books", Value::Map(btree! { "keyPath".to_string() => Value::from("id") })],
            )
            .unwrap()
            .into_handle()
            .unwrap();
        store
            .call("createIndex", args!["by_author", "author"])
            .unwrap();
    });
    let db = factory
        .run_until(awaitdb.open("library", Some(1), options))
        .unwrap()
        .unwrap()
        .into_handle()
        .unwrap();
    (awaitdb, db)
}

fn seed(factory: &MemoryFactory, db: &Handle) {
    let books = [
        json!({"id": 1, "title": "A", "author": "ann"}),
        json!({"id": 2, "title": "B", "author": "bob"}),
        json!({"id": 3, "title": "C", "author": "ann"}),
    ];
    factory
        .run_until(async {
            for book in books {
                db.invoke("add", args!["books", book]).await.unwrap();
            }
        })
        .unwrap();
}

fn read_store(db: &Handle) -> Handle {
    db.call("transaction", args!["books"])
        .unwrap()
        .into_handle()
        .unwrap()
        .get("store")
        .into_handle()
        .unwrap()
}

#[test]
fn books_scenario() {
    let factory = MemoryFactory::new();
    let (awaitdb, db) = library(&factory);

    let (one, all) = factory
        .run_until(async {
            db.invoke("add", args!["books", json!({"id": 1, "title": "A"})])
                .await
                .unwrap();
            let one = db.invoke("get", args!["books", 1]).await.unwrap();
            let all = db.invoke("getAll", args!["books"]).await.unwrap();
            (one, all)
        })
        .unwrap();

    assert_eq!(one.as_value().unwrap().to_json(), json!({"id": 1, "title": "A"}));
    assert_eq!(all.as_value().unwrap().to_json(), json!([{"id": 1, "title": "A"}]));

    db.call("close", vec![]).unwrap();
    let deleted = factory
        .run_until(awaitdb.delete("library", DeleteOptions::new()))
        .unwrap()
        .unwrap();
    assert!(matches!(deleted, Wrapped::Undefined));
    assert!(factory.database_names().is_empty());
}

#[test]
fn wrapping_is_identity_stable() {
    let factory = MemoryFactory::new();
    let (awaitdb, db) = library(&factory);

    let raw = awaitdb.unwrap(&Wrapped::Handle(db.clone())).unwrap();
    let again = awaitdb.wrap(raw.clone()).into_handle().unwrap();
    assert!(again.ptr_eq(&db));
    let twice = awaitdb.wrap(raw.clone()).into_handle().unwrap();
    assert!(twice.ptr_eq(&again));

    let back = awaitdb.unwrap(&Wrapped::Handle(twice)).unwrap();
    assert!(back.as_handle().unwrap().ptr_eq(raw.as_handle().unwrap()));

    // Store handles reached by different routes are one object.
    let tx = db
        .call("transaction", args!["books"])
        .unwrap()
        .into_handle()
        .unwrap();
    let via_store = tx.get("store").into_handle().unwrap();
    let via_call = tx
        .call("objectStore", args!["books"])
        .unwrap()
        .into_handle()
        .unwrap();
    assert!(via_store.ptr_eq(&via_call));
    let owner = via_store.get("transaction").into_handle().unwrap();
    assert!(owner.ptr_eq(&tx));
    factory.drain();
}

#[test]
fn plain_values_pass_through() {
    let factory = MemoryFactory::new();
    let awaitdb = AwaitDb::new(factory);
    for raw in [
        RawValue::from(Value::Integer(42)),
        RawValue::from("forty-two"),
        RawValue::Data(Value::Null),
    ] {
        let wrapped = awaitdb.wrap(raw.clone());
        assert_eq!(wrapped.as_value(), raw.as_value());
    }
    assert!(matches!(awaitdb.wrap(RawValue::Undefined), Wrapped::Undefined));
}

#[test]
fn wrapped_calls_match_raw_calls() {
    let factory = MemoryFactory::new();
    let (awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let store = read_store(&db);
    let raw_store = awaitdb.unwrap(&Wrapped::Handle(store.clone())).unwrap();
    let raw_store = raw_store.as_handle().unwrap().clone();

    let raw_request = raw_store
        .invoke("getAllKeys", vec![RawValue::from(Value::Integer(2))])
        .unwrap();
    let wrapped = store.call("getAllKeys", args![2]).unwrap();
    factory.drain();

    let direct = raw_request
        .as_handle()
        .unwrap()
        .property("result")
        .unwrap();
    let through = wrapped.as_future().unwrap().peek().unwrap().unwrap();
    assert_eq!(through.as_value(), direct.as_value());
    assert_eq!(direct.as_value(), Some(&Value::from(vec![2])));
}

#[test]
fn transaction_done_is_one_future() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    let tx = db
        .call("transaction", args!["books", "readwrite"])
        .unwrap()
        .into_handle()
        .unwrap();

    let first = tx.get("done");
    let second = tx.get("done");
    assert!(first.as_future().unwrap().ptr_eq(second.as_future().unwrap()));
    factory.drain();
}

/// Remembers every transaction whose `store` is read.
struct SpyOnStore {
    previous: Rc<dyn HookSet>,
    seen: Rc<RefCell<Vec<Handle>>>,
}

impl HookSet for SpyOnStore {
    fn get(&self, target: &Handle, name: &str) -> Wrapped {
        if target.kind() == HandleKind::Transaction && name == "store" {
            self.seen.borrow_mut().push(target.clone());
        }
        self.previous.get(target, name)
    }

    fn has(&self, target: &Handle, name: &str) -> bool {
        self.previous.has(target, name)
    }
}

#[test]
fn convenience_writes_wait_for_commit() {
    let factory = MemoryFactory::new();
    let seen: Rc<RefCell<Vec<Handle>>> = Rc::default();
    let spy = seen.clone();
    let awaitdb = AwaitDb::builder(factory.clone())
        .add_hook(move |previous| Rc::new(SpyOnStore { previous, seen: spy }))
        .build();
    let options = OpenOptions::new().upgrade(|up| {
        up.db.call("createObjectStore", args!["kv"]).unwrap();
    });
    let db = factory
        .run_until(awaitdb.open("spied", Some(1), options))
        .unwrap()
        .unwrap()
        .into_handle()
        .unwrap();

    let written = db.call("put", args!["kv", "value", "key"]).unwrap();
    let written = written.as_future().unwrap().clone();

    // The future handed back is the owning transaction's `done`.
    let tx = seen.borrow().last().cloned().unwrap();
    assert!(written.ptr_eq(tx.get("done").as_future().unwrap()));

    let completed = Rc::new(RefCell::new(false));
    let c = completed.clone();
    tx.raw().add_listener(
        EventType::Complete,
        Rc::new(move |_: &Event| *c.borrow_mut() = true),
    );
    assert!(!written.is_settled());

    factory.drain();
    assert!(*completed.borrow());
    assert!(matches!(written.peek(), Some(Ok(Wrapped::Undefined))));

    let read = factory
        .run_until(db.invoke("get", args!["kv", "key"]))
        .unwrap()
        .unwrap();
    assert_eq!(read.as_str(), Some("value"));
}

#[test]
fn convenience_write_future_is_the_transaction_outcome() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);

    let failed = db
        .call("add", args!["books", json!({"title": "no key"})])
        .unwrap();
    let outcome = factory.run_until(failed.as_future().unwrap().clone()).unwrap();
    assert!(outcome.unwrap_err().is(awaitdb::ErrorName::Data));

    seed(&factory, &db);
    let duplicate = db
        .call("add", args!["books", json!({"id": 1, "title": "again"})])
        .unwrap();
    let outcome = factory
        .run_until(duplicate.as_future().unwrap().clone())
        .unwrap();
    assert!(outcome.unwrap_err().is(awaitdb::ErrorName::Constraint));
}

#[test]
fn empty_ranges_make_empty_sequences() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let store = read_store(&db);
    let range = awaitdb::KeyRange::lower_bound(10, false);
    let seq = store
        .call("iterate", args![range])
        .unwrap()
        .into_sequence()
        .unwrap();
    let seen = factory
        .run_until(async { seq.collect(|_| ()).await })
        .unwrap()
        .unwrap();
    assert!(seen.is_empty());
}

#[test]
fn one_facade_for_the_whole_sequence() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let index = read_store(&db)
        .call("index", args!["by_author"])
        .unwrap()
        .into_handle()
        .unwrap();
    let seq = index
        .call(awaitdb::ASYNC_ITERATOR, vec![])
        .unwrap()
        .into_sequence()
        .unwrap();

    let (titles, facades) = factory
        .run_until(async {
            let mut titles = Vec::new();
            let mut facades: Vec<Handle> = Vec::new();
            while let Some(cursor) = seq.next().await {
                let cursor = cursor.unwrap();
                let value = cursor.get("value").into_value().unwrap();
                titles.push(value.get_dotted("title").unwrap().as_str().unwrap().to_string());
                facades.push(cursor);
            }
            (titles, facades)
        })
        .unwrap();

    assert_eq!(titles, vec!["A", "C", "B"]);
    assert_eq!(facades.len(), 3);
    assert!(facades.iter().all(|f| f.ptr_eq(&facades[0])));
}

#[test]
fn cursor_updates_through_the_facade() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let tx = db
        .call("transaction", args!["books", "readwrite"])
        .unwrap()
        .into_handle()
        .unwrap();
    let store = tx.get("store").into_handle().unwrap();
    let seq = store
        .call("iterate", vec![])
        .unwrap()
        .into_sequence()
        .unwrap();

    factory
        .run_until(async {
            while let Some(cursor) = seq.next().await {
                let cursor = cursor.unwrap();
                let mut value = cursor.get("value").into_value().unwrap();
                value.set_dotted("read", Value::from(true));
                cursor.call("update", args![value]).unwrap();
            }
            tx.get("done").settle().await.unwrap();
        })
        .unwrap();

    let all = factory
        .run_until(db.invoke("getAll", args!["books"]))
        .unwrap()
        .unwrap();
    let Some(Value::Array(rows)) = all.as_value() else {
        panic!("expected rows");
    };
    assert_eq!(rows.len(), 3);
    assert!(rows
        .iter()
        .all(|row| row.get_dotted("read") == Some(&Value::from(true))));
}

#[test]
fn index_reads_match_manual_index_access() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    for (method, base) in [
        ("getFromIndex", "get"),
        ("getKeyFromIndex", "getKey"),
        ("getAllFromIndex", "getAll"),
        ("getAllKeysFromIndex", "getAllKeys"),
        ("countFromIndex", "count"),
    ] {
        let (quick, manual) = factory
            .run_until(async {
                let quick = db
                    .invoke(method, args!["books", "by_author", "ann"])
                    .await
                    .unwrap();
                let index = read_store(&db)
                    .call("index", args!["by_author"])
                    .unwrap()
                    .into_handle()
                    .unwrap();
                let manual = index.invoke(base, args!["ann"]).await.unwrap();
                (quick, manual)
            })
            .unwrap();
        assert_eq!(quick.as_value(), manual.as_value(), "{method}");
    }
}

#[test]
fn multi_store_transactions_have_no_store() {
    let factory = MemoryFactory::new();
    let awaitdb = AwaitDb::new(factory.clone());
    let options = OpenOptions::new().upgrade(|up| {
        up.db.call("createObjectStore", args!["a"]).unwrap();
        up.db.call("createObjectStore", args!["b"]).unwrap();
    });
    let db = factory
        .run_until(awaitdb.open("pair", Some(1), options))
        .unwrap()
        .unwrap()
        .into_handle()
        .unwrap();

    let tx = db
        .call("transaction", args![Value::from(vec!["a", "b"])])
        .unwrap()
        .into_handle()
        .unwrap();
    assert!(tx.get("store").is_nullish());
    assert!(tx.call("objectStore", args!["a"]).is_ok());
    factory.drain();
}

#[test]
fn index_sequences_can_step_by_primary_key() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);
    factory
        .run_until(db.invoke(
            "add",
            args!["books", json!({"id": 4, "title": "D", "author": "ann"})],
        ))
        .unwrap()
        .unwrap();

    let index = read_store(&db)
        .call("index", args!["by_author"])
        .unwrap()
        .into_handle()
        .unwrap();
    let seq = index.call("iterate", vec![]).unwrap().into_sequence().unwrap();

    let primary_keys = factory
        .run_until(async {
            let mut keys = Vec::new();
            while let Some(cursor) = seq.next().await {
                let cursor = cursor.unwrap();
                let primary_key = cursor.get("primaryKey").into_value().unwrap();
                if primary_key == Value::Integer(1) {
                    // Skip ann's book 3 and land on book 4.
                    let r = cursor.call("continuePrimaryKey", args!["ann", 4]).unwrap();
                    assert!(matches!(r, Wrapped::Undefined));
                }
                keys.push(primary_key);
            }
            keys
        })
        .unwrap();

    assert_eq!(
        primary_keys,
        vec![Value::Integer(1), Value::Integer(4), Value::Integer(2)]
    );
}

#[test]
fn failed_requests_reject_the_transaction_outcome() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let tx = db
        .call("transaction", args!["books", "readwrite"])
        .unwrap()
        .into_handle()
        .unwrap();
    let store = tx.get("store").into_handle().unwrap();
    let duplicate = store
        .call("add", args![json!({"id": 1, "title": "again"})])
        .unwrap();

    let (write, done) = factory
        .run_until(async {
            let write = duplicate.settle().await;
            let done = tx.get("done").settle().await;
            (write, done)
        })
        .unwrap();

    assert!(write.unwrap_err().is(awaitdb::ErrorName::Constraint));
    let err = done.unwrap_err();
    assert!(err.is(awaitdb::ErrorName::Constraint));
    assert_eq!(err.native(), tx.raw().error().as_ref());
}

#[test]
fn explicit_aborts_reject_the_transaction_outcome() {
    let factory = MemoryFactory::new();
    let (_awaitdb, db) = library(&factory);
    seed(&factory, &db);

    let tx = db
        .call("transaction", args!["books", "readwrite"])
        .unwrap()
        .into_handle()
        .unwrap();
    let store = tx.get("store").into_handle().unwrap();
    store
        .call("put", args![json!({"id": 9, "title": "never"})])
        .unwrap();
    let done = tx.get("done").as_future().unwrap().clone();
    tx.call("abort", vec![]).unwrap();

    let outcome = factory.run_until(done).unwrap();
    assert!(outcome.unwrap_err().is(awaitdb::ErrorName::Abort));

    let missing = factory
        .run_until(db.invoke("get", args!["books", 9]))
        .unwrap()
        .unwrap();
    assert!(missing.is_nullish());
}
