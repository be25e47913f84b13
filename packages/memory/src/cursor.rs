//! Cursors.
//!
//! A cursor belongs to the request that opened it. Every move queues that
//! same request again, and the move's outcome (the cursor itself, or null
//! once the range is exhausted) is delivered as another `success` event.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use awaitdb_native::{
    CursorDirection, HandleId, HandleKind, Key, KeyPath, KeyRange, NativeError, NativeObject,
    NativeResult, RawHandle, RawValue, Value,
};
use tracing::trace;

use crate::args;
use crate::data::{seek, Position, Seek};
use crate::request::Request;
use crate::store::Source;
use crate::transaction::Transaction;

pub struct Cursor {
    id: HandleId,
    this: Weak<Cursor>,
    with_value: bool,
    tx: Rc<Transaction>,
    request: RefCell<Option<Rc<Request>>>,
    source: Source,
    source_handle: RawHandle,
    direction: CursorDirection,
    range: Option<KeyRange>,
    position: RefCell<Option<Position>>,
    value: RefCell<Value>,
    got_value: Cell<bool>,
}

impl Cursor {
    pub(crate) fn new(
        tx: Rc<Transaction>,
        request: Rc<Request>,
        source: Source,
        source_handle: RawHandle,
        direction: CursorDirection,
        range: Option<KeyRange>,
        with_value: bool,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: HandleId::allocate(),
            this: this.clone(),
            with_value,
            tx,
            request: RefCell::new(Some(request)),
            source,
            source_handle,
            direction,
            range,
            position: RefCell::new(None),
            value: RefCell::new(Value::Null),
            got_value: Cell::new(false),
        })
    }

    fn strong(&self) -> NativeResult<Rc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| NativeError::invalid_state("cursor has been dropped"))
    }

    /// Unlink from the request once the transaction is over.
    pub(crate) fn release(&self) {
        self.request.borrow_mut().take();
    }

    /// Move `count` rows (or to the first row at/after `key`).
    ///
    /// Returns the cursor handle, or null once the range is exhausted.
    pub(crate) fn step(
        self: &Rc<Self>,
        count: u32,
        key: Option<Key>,
        primary_key: Option<Key>,
    ) -> NativeResult<RawValue> {
        let rows = self
            .tx
            .with_data(|data| self.source.rows(data, self.range.as_ref()))?;
        let mut position = self.position.borrow().clone();
        let mut found = None;
        for i in 0..count.max(1) {
            let target = Seek {
                from: position.as_ref().map(|(k, pk)| (k, pk)),
                key: if i == 0 { key.as_ref() } else { None },
                primary_key: if i == 0 { primary_key.as_ref() } else { None },
            };
            found = seek(&rows, self.direction, &target);
            match found {
                Some(idx) => position = Some((rows[idx].0.clone(), rows[idx].1.clone())),
                None => break,
            }
        }

        match found {
            Some(idx) => {
                let (key, primary_key, value) = rows[idx].clone();
                trace!(cursor = %self.id, ?key, "cursor positioned");
                *self.position.borrow_mut() = Some((key, primary_key));
                *self.value.borrow_mut() = value;
                self.got_value.set(true);
                Ok(RawValue::Handle(RawHandle::new(self.clone())))
            }
            None => {
                trace!(cursor = %self.id, "cursor exhausted");
                *self.position.borrow_mut() = None;
                *self.value.borrow_mut() = Value::Null;
                Ok(RawValue::Data(Value::Null))
            }
        }
    }

    fn check_movable(&self) -> NativeResult<Rc<Request>> {
        self.tx.check_active()?;
        if !self.got_value.get() {
            return Err(NativeError::invalid_state(
                "the cursor is being iterated or has reached its end",
            ));
        }
        self.request
            .borrow()
            .clone()
            .ok_or_else(|| NativeError::invalid_state("the cursor's request is gone"))
    }

    fn current(&self) -> NativeResult<Position> {
        self.position
            .borrow()
            .clone()
            .ok_or_else(|| NativeError::invalid_state("the cursor has no current position"))
    }

    /// Queue the move on the cursor's own request.
    fn schedule_move(&self, request: Rc<Request>, count: u32, key: Option<Key>, primary_key: Option<Key>) -> NativeResult<RawValue> {
        let cursor = self.strong()?;
        self.got_value.set(false);
        request.reset();
        self.tx.enqueue(
            request,
            Box::new(move |_: &Rc<Transaction>, _: &Rc<Request>| cursor.step(count, key, primary_key)),
        )?;
        Ok(RawValue::Undefined)
    }

    fn continue_(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        let request = self.check_movable()?;
        let key = args::optional_key(args, 0)?;
        if let Some(target) = &key {
            let (current, _) = self.current()?;
            let behind = if self.direction.is_forward() {
                *target <= current
            } else {
                *target >= current
            };
            if behind {
                return Err(NativeError::data(
                    "the target key is not past the cursor's position",
                ));
            }
        }
        self.schedule_move(request, 1, key, None)
    }

    fn continue_primary_key(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        let request = self.check_movable()?;
        if !self.source.is_index() || self.direction.is_unique() {
            return Err(NativeError::invalid_access(
                "continuePrimaryKey needs an index cursor with a non-unique direction",
            ));
        }
        let key = args::key(args, 0)?;
        let primary_key = args::key(args, 1)?;
        let (current, current_pk) = self.current()?;
        let behind = if self.direction.is_forward() {
            key < current || (key == current && primary_key <= current_pk)
        } else {
            key > current || (key == current && primary_key >= current_pk)
        };
        if behind {
            return Err(NativeError::data(
                "the target is not past the cursor's position",
            ));
        }
        self.schedule_move(request, 1, Some(key), Some(primary_key))
    }

    fn advance(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        let count = match args::arg(args, 0).as_value().and_then(Value::as_u64) {
            Some(n) if n > 0 && n <= u32::MAX as u64 => n as u32,
            _ => return Err(NativeError::type_error("advance count must be a positive integer")),
        };
        let request = self.check_movable()?;
        self.schedule_move(request, count, None, None)
    }

    fn update(&self, args: &[RawValue]) -> NativeResult<RawValue> {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        if !self.got_value.get() || !self.with_value {
            return Err(NativeError::invalid_state("the cursor has no current value"));
        }
        let (_, primary_key) = self.current()?;
        let value = args::value(args, 0)?;
        let store = self.source.store_name().to_string();
        let inline = self.tx.with_data(|data| Ok(data.store(&store)?.key_path.clone()))?;
        let explicit = match inline {
            Some(path) => {
                if KeyPath::evaluate(&path, &value).as_ref() != Some(&primary_key) {
                    return Err(NativeError::data(
                        "the updated value's key does not match the cursor's primary key",
                    ));
                }
                None
            }
            None => Some(primary_key),
        };
        self.tx.request(
            RawHandle::new(self.strong()?),
            Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
                let key = tx.with_data_mut(|data| data.store_mut(&store)?.put(value, explicit, false))?;
                Ok(RawValue::Data(key.to_value()))
            }),
        )
    }

    fn delete(&self) -> NativeResult<RawValue> {
        self.tx.check_active()?;
        self.tx.check_writable()?;
        if !self.got_value.get() || !self.with_value {
            return Err(NativeError::invalid_state("the cursor has no current value"));
        }
        let (_, primary_key) = self.current()?;
        let store = self.source.store_name().to_string();
        self.tx.request(
            RawHandle::new(self.strong()?),
            Box::new(move |tx: &Rc<Transaction>, _: &Rc<Request>| {
                tx.with_data_mut(|data| {
                    data.store_mut(&store)?.delete(&KeyRange::only(primary_key));
                    Ok(RawValue::Undefined)
                })
            }),
        )
    }
}

impl NativeObject for Cursor {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> HandleKind {
        if self.with_value {
            HandleKind::CursorWithValue
        } else {
            HandleKind::Cursor
        }
    }

    fn property(&self, name: &str) -> Option<RawValue> {
        let position = self.position.borrow();
        match name {
            "key" => Some(match position.as_ref() {
                Some((k, _)) => RawValue::Data(k.to_value()),
                None => RawValue::Undefined,
            }),
            "primaryKey" => Some(match position.as_ref() {
                Some((_, pk)) => RawValue::Data(pk.to_value()),
                None => RawValue::Undefined,
            }),
            "value" if self.with_value => Some(RawValue::Data(self.value.borrow().clone())),
            "direction" => Some(RawValue::from(self.direction.as_str())),
            "source" => Some(RawValue::Handle(self.source_handle.clone())),
            "request" => Some(match self.request.borrow().as_ref() {
                Some(r) => RawValue::Handle(r.handle()),
                None => RawValue::Data(Value::Null),
            }),
            "continue" | "continuePrimaryKey" | "advance" | "update" | "delete" => {
                args::method(HandleKind::Cursor, name)
            }
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: Vec<RawValue>) -> NativeResult<RawValue> {
        match method {
            "continue" => self.continue_(&args),
            "continuePrimaryKey" => self.continue_primary_key(&args),
            "advance" => self.advance(&args),
            "update" => self.update(&args),
            "delete" => self.delete(),
            other => Err(NativeError::type_error(format!(
                "Cursor.{} is not a function",
                other
            ))),
        }
    }
}
