//! Turning request and transaction events into futures.

use std::cell::RefCell;
use std::rc::Rc;

use awaitdb_native::{ErrorName, Event, EventType, ListenerId, NativeError, RawHandle, RawValue};
use tracing::{debug, trace};

use crate::{Promise, Resolver, Wrapped, Wrapper};

type Registered = Rc<RefCell<Vec<ListenerId>>>;

fn unlisten(target: &RawHandle, registered: &Registered) {
    for id in registered.borrow_mut().drain(..) {
        target.remove_listener(id);
    }
}

fn listen(
    target: &RawHandle,
    registered: &Registered,
    kinds: &[EventType],
    on_event: impl Fn(&RawHandle, &Event) + 'static,
) -> bool {
    let on_event = Rc::new(on_event);
    for &kind in kinds {
        let (weak, registered_ref, on_event) = (target.downgrade(), registered.clone(), on_event.clone());
        let listener = Rc::new(move |event: &Event| {
            let Some(target) = weak.upgrade() else { return };
            unlisten(&target, &registered_ref);
            on_event(&target, event);
        });
        match target.add_listener(kind, listener) {
            Some(id) => registered.borrow_mut().push(id),
            None => return false,
        }
    }
    true
}

/// A future for one outcome of `request`.
///
/// Resolves with the wrapped `result` on `success` and rejects with the
/// request's own error on `error`. Both listeners are removed as soon as
/// either fires, so a reused request can back any number of futures.
pub(crate) fn request_future(wrapper: &Wrapper, request: &RawHandle) -> Promise {
    let (promise, resolver) = Promise::channel();
    wrapper.cache().insert_reverse(promise.id(), request);

    let registered = Registered::default();
    let (w, r) = (wrapper.clone(), resolver.clone());
    let listening = listen(
        request,
        &registered,
        &[EventType::Success, EventType::Error],
        move |request, event| settle_request(&w, &r, request, event),
    );
    if !listening {
        unlisten(request, &registered);
        resolver.reject(NativeError::type_error(format!(
            "{} does not fire events",
            request.kind()
        )));
    }
    promise
}

fn settle_request(wrapper: &Wrapper, resolver: &Resolver, request: &RawHandle, event: &Event) {
    if event.kind == EventType::Error {
        let error = request
            .error()
            .unwrap_or_else(|| NativeError::new(ErrorName::Unknown, "request failed"));
        trace!(?request, %error, "request failed");
        resolver.reject(error);
        return;
    }
    let result = request.property("result").unwrap_or_default();
    if let RawValue::Handle(cursor) = &result {
        if cursor.kind().is_cursor() {
            wrapper.cache().record_cursor_request(cursor, request);
        }
    }
    resolver.resolve(wrapper.wrap(result));
}

/// A future for the outcome of `transaction`: resolves on `complete`,
/// rejects with the transaction's error on `error` or `abort`.
pub(crate) fn completion_future(transaction: &RawHandle) -> Promise {
    let (promise, resolver) = Promise::channel();
    let registered = Registered::default();
    let r = resolver.clone();
    let listening = listen(
        transaction,
        &registered,
        &[EventType::Complete, EventType::Error, EventType::Abort],
        move |tx, event| {
            if event.kind == EventType::Complete {
                debug!(transaction = ?tx, "transaction complete");
                r.resolve(Wrapped::Undefined);
            } else {
                let error = tx
                    .error()
                    .unwrap_or_else(|| NativeError::abort("the transaction was aborted"));
                debug!(transaction = ?tx, %error, "transaction failed");
                r.reject(error);
            }
        },
    );
    if !listening {
        unlisten(transaction, &registered);
        resolver.reject(NativeError::type_error(format!(
            "{} does not fire events",
            transaction.kind()
        )));
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;
    use awaitdb_native::{
        EventTarget, HandleId, HandleKind, ListenerList, NativeObject, NativeResult, Value,
    };
    use std::cell::Cell;

    /// A request whose events the test fires by hand.
    struct ManualRequest {
        id: HandleId,
        result: RefCell<RawValue>,
        error: RefCell<Option<NativeError>>,
        listeners: ListenerList,
    }

    impl ManualRequest {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                id: HandleId::allocate(),
                result: RefCell::new(RawValue::Undefined),
                error: RefCell::new(None),
                listeners: ListenerList::new(),
            })
        }

        fn succeed(&self, value: RawValue) {
            *self.result.borrow_mut() = value;
            self.listeners.dispatch(&Event::new(EventType::Success));
        }

        fn fail(&self, error: NativeError) {
            *self.error.borrow_mut() = Some(error);
            self.listeners.dispatch(&Event::new(EventType::Error));
        }
    }

    impl NativeObject for ManualRequest {
        fn id(&self) -> HandleId {
            self.id
        }

        fn kind(&self) -> HandleKind {
            HandleKind::Request
        }

        fn property(&self, name: &str) -> Option<RawValue> {
            (name == "result").then(|| self.result.borrow().clone())
        }

        fn invoke(&self, method: &str, _args: Vec<RawValue>) -> NativeResult<RawValue> {
            Err(NativeError::type_error(method.to_string()))
        }

        fn events(&self) -> Option<&dyn EventTarget> {
            Some(&self.listeners)
        }

        fn error(&self) -> Option<NativeError> {
            self.error.borrow().clone()
        }
    }

    #[test]
    fn success_resolves_with_the_wrapped_result() {
        let wrapper = Wrapper::new(Registry::new());
        let request = ManualRequest::new();
        let promise = request_future(&wrapper, &RawHandle::new(request.clone()));

        assert!(!promise.is_settled());
        request.succeed(RawValue::Data(Value::from("hit")));
        let value = promise.peek().unwrap().unwrap();
        assert_eq!(value.as_str(), Some("hit"));
        assert!(request.listeners.is_empty());
    }

    #[test]
    fn errors_are_passed_through_unchanged() {
        let wrapper = Wrapper::new(Registry::new());
        let request = ManualRequest::new();
        let promise = request_future(&wrapper, &RawHandle::new(request.clone()));

        let native = NativeError::constraint("key already exists");
        request.fail(native.clone());
        let err = promise.peek().unwrap().unwrap_err();
        assert_eq!(err.native(), Some(&native));
        assert!(request.listeners.is_empty());
    }

    #[test]
    fn a_reused_request_backs_successive_futures() {
        let wrapper = Wrapper::new(Registry::new());
        let request = ManualRequest::new();
        let raw = RawHandle::new(request.clone());

        let first = request_future(&wrapper, &raw);
        request.succeed(RawValue::Data(Value::from(1)));
        let second = request_future(&wrapper, &raw);
        request.succeed(RawValue::Data(Value::from(2)));

        assert_eq!(first.peek().unwrap().unwrap().as_value(), Some(&Value::from(1)));
        assert_eq!(second.peek().unwrap().unwrap().as_value(), Some(&Value::from(2)));
    }

    struct Silent(HandleId);

    impl NativeObject for Silent {
        fn id(&self) -> HandleId {
            self.0
        }

        fn kind(&self) -> HandleKind {
            HandleKind::Transaction
        }

        fn property(&self, _name: &str) -> Option<RawValue> {
            None
        }

        fn invoke(&self, _method: &str, _args: Vec<RawValue>) -> NativeResult<RawValue> {
            Ok(RawValue::Undefined)
        }
    }

    #[test]
    fn targets_without_events_reject() {
        let promise = completion_future(&RawHandle::new(Rc::new(Silent(HandleId::allocate()))));
        let err = promise.peek().unwrap().unwrap_err();
        assert!(err.is(ErrorName::Type));
    }

    #[test]
    fn completion_fires_once() {
        let tx = Rc::new(TxStub {
            id: HandleId::allocate(),
            listeners: ListenerList::new(),
        });
        let promise = completion_future(&RawHandle::new(tx.clone()));
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        promise.on_settled(move |_| h.set(h.get() + 1));

        tx.listeners.dispatch(&Event::new(EventType::Error));
        tx.listeners.dispatch(&Event::new(EventType::Abort));
        assert_eq!(hits.get(), 1);
        assert!(promise.peek().unwrap().unwrap_err().is(ErrorName::Abort));
        assert!(tx.listeners.is_empty());
    }

    struct TxStub {
        id: HandleId,
        listeners: ListenerList,
    }

    impl NativeObject for TxStub {
        fn id(&self) -> HandleId {
            self.id
        }

        fn kind(&self) -> HandleKind {
            HandleKind::Transaction
        }

        fn property(&self, _name: &str) -> Option<RawValue> {
            None
        }

        fn invoke(&self, _method: &str, _args: Vec<RawValue>) -> NativeResult<RawValue> {
            Ok(RawValue::Undefined)
        }

        fn events(&self) -> Option<&dyn EventTarget> {
            Some(&self.listeners)
        }
    }
}
