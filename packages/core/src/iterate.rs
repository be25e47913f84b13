//! Cursors as lazy, pull-driven sequences.
//!
//! Stores and indexes answer `iterate(query?, direction?)` and
//! [`ASYNC_ITERATOR`]; cursors answer [`ASYNC_ITERATOR`] to iterate from
//! their current position. All of them return a [`CursorSequence`].
//!
//! Each element is the same facade over the cursor. Calling `continue`,
//! `continuePrimaryKey` or `advance` on the facade picks how the next
//! step moves; if none was called, the next step is a plain `continue`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::rc::Rc;

use awaitdb_native::{HandleKind, NativeError};
use tracing::{debug, trace};

use crate::handle::ADVANCE_METHODS;
use crate::{Error, Handle, HookSet, Method, Result, Wrapped};

/// Member name for "iterate from here", the adapter's async-iterator slot.
pub const ASYNC_ITERATOR: &str = "@@asyncIterator";
/// Member name for "open a cursor and iterate it".
pub const ITERATE: &str = "iterate";

/// The iteration hook. Install with
/// `registry.add_hook(awaitdb_core::iteration)`.
pub fn iteration(previous: Rc<dyn HookSet>) -> Rc<dyn HookSet> {
    let sequence = |this: &Handle, args: Vec<Wrapped>| -> Result<Wrapped> {
        Ok(Wrapped::Sequence(CursorSequence::new(this.clone(), args)))
    };
    Rc::new(Iteration {
        previous,
        async_iterator: Method::new(ASYNC_ITERATOR, sequence),
        iterate: Method::new(ITERATE, sequence),
    })
}

struct Iteration {
    previous: Rc<dyn HookSet>,
    async_iterator: Method,
    iterate: Method,
}

impl Iteration {
    fn claims(&self, target: &Handle, name: &str) -> Option<&Method> {
        let kind = target.kind();
        let scannable = matches!(kind, HandleKind::ObjectStore | HandleKind::Index);
        match name {
            ASYNC_ITERATOR if scannable || kind.is_cursor() => Some(&self.async_iterator),
            ITERATE if scannable => Some(&self.iterate),
            _ => None,
        }
    }
}

impl HookSet for Iteration {
    fn get(&self, target: &Handle, name: &str) -> Wrapped {
        match self.claims(target, name) {
            Some(method) => Wrapped::Method(method.clone()),
            None => self.previous.get(target, name),
        }
    }

    fn has(&self, target: &Handle, name: &str) -> bool {
        self.claims(target, name).is_some() || self.previous.has(target, name)
    }
}

/// The advance the consumer asked for during its turn, if any.
type Requested = Rc<RefCell<Option<Wrapped>>>;

/// The position a step started from: the cursor and its facade.
type Origin = Option<(Handle, Handle)>;

enum State {
    AwaitingFirst {
        source: Handle,
        args: Vec<Wrapped>,
    },
    Positioned {
        cursor: Handle,
        facade: Handle,
        requested: Requested,
    },
    /// A step was issued but whoever awaited it went away.
    Suspended {
        pending: Wrapped,
        origin: Origin,
        requested: Requested,
    },
    /// A step is being awaited.
    Advancing,
    Exhausted,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::AwaitingFirst { .. } => "awaiting-first",
            State::Positioned { .. } => "positioned",
            State::Suspended { .. } => "suspended",
            State::Advancing => "advancing",
            State::Exhausted => "exhausted",
        }
    }
}

/// Parks an in-flight step back into the sequence if the awaiting
/// future is dropped before the step settles.
struct InFlight<'a> {
    sequence: &'a CursorSequence,
    park: Option<State>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let Some(state) = self.park.take() else { return };
        if let Ok(mut current) = self.sequence.0.try_borrow_mut() {
            trace!("cursor sequence step abandoned");
            *current = state;
        }
    }
}

/// A single-pass sequence of cursor positions.
///
/// ```rust,no_run
/// # async fn scan(store: awaitdb_core::Handle) -> awaitdb_core::Result<()> {
/// let books = store.call("iterate", vec![])?.into_sequence()?;
/// while let Some(cursor) = books.next().await {
///     let cursor = cursor?;
///     println!("{:?}", cursor.get("value"));
/// }
/// # Ok(())
/// # }
/// ```
///
/// Dropping a sequence part-way is fine; the cursor is released with its
/// transaction.
#[derive(Clone)]
pub struct CursorSequence(Rc<RefCell<State>>);

impl CursorSequence {
    /// Iterate `source`: a cursor as is, or a store or index through
    /// `openCursor(args)`.
    pub fn new(source: Handle, args: Vec<Wrapped>) -> Self {
        CursorSequence(Rc::new(RefCell::new(State::AwaitingFirst { source, args })))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(*self.0.borrow(), State::Exhausted)
    }

    /// The next position, or `None` once the cursor runs out.
    ///
    /// An error ends the sequence after it is returned. Dropping the
    /// returned future mid-step is allowed; the step stays issued and the
    /// next call picks it up.
    pub async fn next(&self) -> Option<Result<Handle>> {
        let state = mem::replace(&mut *self.0.borrow_mut(), State::Advancing);
        trace!(state = state.name(), "cursor sequence step");

        let issued: Result<(Wrapped, Origin, Requested)> = match state {
            State::Exhausted => {
                *self.0.borrow_mut() = State::Exhausted;
                return None;
            }
            State::Advancing => {
                return Some(Err(NativeError::invalid_state(
                    "the cursor sequence is already advancing",
                )
                .into()))
            }
            State::AwaitingFirst { source, args } => {
                first(source, args).map(|pending| (pending, None, Requested::default()))
            }
            State::Positioned {
                cursor,
                facade,
                requested,
            } => step(&cursor, &requested)
                .map(|pending| (pending, Some((cursor, facade)), requested)),
            State::Suspended {
                pending,
                origin,
                requested,
            } => Ok((pending, origin, requested)),
        };
        let (pending, origin, requested) = match issued {
            Ok(issued) => issued,
            Err(e) => {
                *self.0.borrow_mut() = State::Exhausted;
                return Some(Err(e));
            }
        };

        let mut in_flight = InFlight {
            sequence: self,
            park: Some(State::Suspended {
                pending: pending.clone(),
                origin: origin.clone(),
                requested: requested.clone(),
            }),
        };
        let found = pending.settle().await.and_then(position);
        in_flight.park = None;

        match found {
            Ok(Some(cursor)) => {
                let facade = match origin {
                    Some((old, facade)) if old.ptr_eq(&cursor) => facade,
                    _ => facade_for(&cursor, &requested),
                };
                *self.0.borrow_mut() = State::Positioned {
                    cursor,
                    facade: facade.clone(),
                    requested,
                };
                Some(Ok(facade))
            }
            Ok(None) => {
                debug!("cursor sequence exhausted");
                *self.0.borrow_mut() = State::Exhausted;
                None
            }
            Err(e) => {
                *self.0.borrow_mut() = State::Exhausted;
                Some(Err(e))
            }
        }
    }

    /// Drain the rest of the sequence, mapping each position.
    pub async fn collect<T>(&self, mut f: impl FnMut(&Handle) -> T) -> Result<Vec<T>> {
        let mut out = Vec::new();
        while let Some(position) = self.next().await {
            out.push(f(&position?));
        }
        Ok(out)
    }
}

impl fmt::Debug for CursorSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.try_borrow().map(|s| s.name()).unwrap_or("busy");
        write!(f, "CursorSequence({state})")
    }
}

/// Issue the first step: a cursor source is its own first position.
fn first(source: Handle, args: Vec<Wrapped>) -> Result<Wrapped> {
    if source.kind().is_cursor() {
        return Ok(Wrapped::Handle(source));
    }
    source.call("openCursor", args)
}

/// Issue the next step: whatever the consumer asked for, else `continue`.
fn step(cursor: &Handle, requested: &Requested) -> Result<Wrapped> {
    let pending = requested.borrow_mut().take();
    match pending {
        Some(next) => Ok(next),
        None => cursor.call("continue", Vec::new()),
    }
}

fn position(value: Wrapped) -> Result<Option<Handle>> {
    match value {
        Wrapped::Handle(cursor) if cursor.kind().is_cursor() => Ok(Some(cursor)),
        v if v.is_nullish() => Ok(None),
        _ => Err(Error::NotAHandle {
            expected: "a cursor or null",
        }),
    }
}

fn facade_for(cursor: &Handle, requested: &Requested) -> Handle {
    let hooks = Rc::new(FacadeHooks {
        cursor: cursor.clone(),
        requested: requested.clone(),
        advance: RefCell::new(HashMap::new()),
    });
    Handle::facade(cursor.raw().clone(), cursor.wrapper().clone(), hooks)
}

/// Members of the facade: the cursor's own, except that advancing only
/// records the request.
struct FacadeHooks {
    cursor: Handle,
    requested: Requested,
    advance: RefCell<HashMap<&'static str, Method>>,
}

impl FacadeHooks {
    fn advance_method(&self, name: &str) -> Option<Method> {
        let name = ADVANCE_METHODS.iter().copied().find(|m| *m == name)?;
        let method = self
            .advance
            .borrow_mut()
            .entry(name)
            .or_insert_with(|| {
                let (cursor, requested) = (self.cursor.clone(), self.requested.clone());
                Method::new(name, move |_facade, args| {
                    let next = cursor.call(name, args)?;
                    *requested.borrow_mut() = Some(next);
                    Ok(Wrapped::Undefined)
                })
            })
            .clone();
        Some(method)
    }
}

impl HookSet for FacadeHooks {
    fn get(&self, _target: &Handle, name: &str) -> Wrapped {
        match self.advance_method(name) {
            Some(method) => Wrapped::Method(method),
            None => self.cursor.get(name),
        }
    }

    fn has(&self, _target: &Handle, name: &str) -> bool {
        ADVANCE_METHODS.contains(&name) || self.cursor.has(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, Registry, Wrapper};
    use awaitdb_memory::MemoryFactory;
    use awaitdb_native::{ErrorName, Event, EventType, KeyRange, NativeFactory, RawValue, Value};

    fn numbers(factory: &MemoryFactory, count: i64) -> Handle {
        let request = factory.open("iterate", Some(1)).unwrap();
        let weak = request.downgrade();
        request.add_listener(
            EventType::UpgradeNeeded,
            Rc::new(move |_: &Event| {
                let Some(request) = weak.upgrade() else { return };
                let db = request.property("result").unwrap();
                db.as_handle()
                    .unwrap()
                    .invoke("createObjectStore", vec![RawValue::from("n")])
                    .unwrap();
            }),
        );
        factory.drain();

        let mut registry = Registry::new();
        registry.add_hook(iteration);
        let db = Wrapper::new(registry)
            .wrap(request.property("result").unwrap())
            .into_handle()
            .unwrap();

        let tx = db
            .call("transaction", args!["n", "readwrite"])
            .unwrap()
            .into_handle()
            .unwrap();
        let store = tx.get("store").into_handle().unwrap();
        for i in 1..=count {
            store.call("put", args![i * 10, i]).unwrap();
        }
        factory.drain();
        db
    }

    fn store(db: &Handle) -> Handle {
        let tx = db.call("transaction", args!["n"]).unwrap().into_handle().unwrap();
        tx.get("store").into_handle().unwrap()
    }

    fn key(cursor: &Handle) -> i64 {
        match cursor.get("key").as_value() {
            Some(Value::Integer(i)) => *i,
            other => panic!("unexpected key {:?}", other),
        }
    }

    #[test]
    fn iteration_is_offered_where_cursors_live() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 0);
        let store = store(&db);
        assert!(store.has(ITERATE));
        assert!(store.has(ASYNC_ITERATOR));
        assert!(!db.has(ITERATE));
        assert!(db.get(ASYNC_ITERATOR).is_nullish());
    }

    #[test]
    fn walks_every_record_with_one_facade() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 4);
        let store = store(&db);
        let seq = store.call(ITERATE, vec![]).unwrap().into_sequence().unwrap();

        let (keys, facades) = factory
            .run_until(async {
                let mut keys = Vec::new();
                let mut facades: Vec<Handle> = Vec::new();
                while let Some(cursor) = seq.next().await {
                    let cursor = cursor.unwrap();
                    keys.push(key(&cursor));
                    facades.push(cursor);
                }
                (keys, facades)
            })
            .unwrap();

        assert_eq!(keys, vec![1, 2, 3, 4]);
        assert!(facades.iter().all(|f| f.ptr_eq(&facades[0])));
        assert!(seq.is_exhausted());
    }

    #[test]
    fn empty_ranges_yield_nothing() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 3);
        let store = store(&db);
        let range = KeyRange::bound(100, 200, false, false).unwrap();
        let seq = store
            .call(ITERATE, args![range])
            .unwrap()
            .into_sequence()
            .unwrap();

        let count = factory
            .run_until(async { seq.collect(|_| ()).await.unwrap().len() })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn the_consumer_chooses_how_to_advance() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 6);
        let store = store(&db);
        let seq = store.call(ASYNC_ITERATOR, vec![]).unwrap().into_sequence().unwrap();

        let keys = factory
            .run_until(async {
                let mut keys = Vec::new();
                while let Some(cursor) = seq.next().await {
                    let cursor = cursor.unwrap();
                    let k = key(&cursor);
                    keys.push(k);
                    match k {
                        1 => {
                            // Facade advances report nothing at the call site.
                            let r = cursor.call("advance", args![2]).unwrap();
                            assert!(matches!(r, Wrapped::Undefined));
                        }
                        3 => {
                            cursor.call("continue", args![6]).unwrap();
                        }
                        _ => {}
                    }
                }
                keys
            })
            .unwrap();

        assert_eq!(keys, vec![1, 3, 6]);
    }

    #[test]
    fn iterating_from_a_cursor_starts_at_its_position() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 3);
        let store = store(&db);

        let keys = factory
            .run_until(async {
                let cursor = store.invoke("openCursor", args![2]).await.unwrap();
                let cursor = cursor.into_handle().unwrap();
                assert!(cursor.has(ASYNC_ITERATOR));
                let seq = cursor.call(ASYNC_ITERATOR, vec![]).unwrap().into_sequence().unwrap();
                seq.collect(key).await.unwrap()
            })
            .unwrap();
        assert_eq!(keys, vec![2]);
    }

    #[test]
    fn plain_cursors_advance_through_fresh_futures() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 2);
        let store = store(&db);

        factory
            .run_until(async {
                let cursor = store.invoke("openCursor", vec![]).await.unwrap();
                let cursor = cursor.into_handle().unwrap();
                assert_eq!(key(&cursor), 1);

                let next = cursor.call("continue", vec![]).unwrap();
                let next = next.as_future().unwrap().clone();
                let again = next.await.unwrap().into_handle().unwrap();
                assert!(again.ptr_eq(&cursor));
                assert_eq!(key(&cursor), 2);

                let end = cursor.invoke("continue", vec![]).await.unwrap();
                assert!(end.is_nullish());
            })
            .unwrap();
    }

    #[test]
    fn a_failed_advance_call_records_nothing() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 3);
        let store = store(&db);
        let seq = store.call(ITERATE, vec![]).unwrap().into_sequence().unwrap();

        let keys = factory
            .run_until(async {
                let cursor = seq.next().await.unwrap().unwrap();
                // Moving backwards is a DataError from the engine.
                let err = cursor.call("continue", args![0]).unwrap_err();
                assert!(err.is(ErrorName::Data));
                // Nothing was recorded, so the next step is a plain continue.
                seq.collect(key).await.unwrap()
            })
            .unwrap();
        assert_eq!(keys, vec![2, 3]);
    }

    /// Start a step and drop it before it can finish.
    async fn walk_away(seq: &CursorSequence) {
        tokio::select! {
            biased;
            _ = seq.next() => panic!("a step settled without the engine running"),
            _ = std::future::ready(()) => {}
        }
    }

    #[test]
    fn dropped_steps_are_picked_up_by_the_next_call() {
        let factory = MemoryFactory::new();
        let db = numbers(&factory, 3);
        let store = store(&db);
        let seq = store.call(ITERATE, vec![]).unwrap().into_sequence().unwrap();

        let keys = factory
            .run_until(async {
                walk_away(&seq).await;
                let mut keys = vec![key(&seq.next().await.unwrap().unwrap())];
                walk_away(&seq).await;
                keys.extend(seq.collect(key).await.unwrap());
                keys
            })
            .unwrap();
        assert_eq!(keys, vec![1, 2, 3]);
        assert!(seq.is_exhausted());
    }
}
