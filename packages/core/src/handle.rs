//! Wrapped handles and wrapped methods.

use std::fmt;
use std::rc::{Rc, Weak};

use awaitdb_native::{HandleKind, NativeError, NativeMethod, RawHandle};
use tracing::trace;

use crate::cache::WrapperId;
use crate::hooks::HookSet;
use crate::{Error, Result, Wrapped, Wrapper};

/// Cursor methods that move the cursor and report through its request.
pub(crate) const ADVANCE_METHODS: [&str; 3] = ["continue", "continuePrimaryKey", "advance"];

pub(crate) struct HandleInner {
    id: WrapperId,
    raw: RawHandle,
    wrapper: Wrapper,
    /// Consulted instead of the wrapper's chain (cursor facades).
    overlay: Option<Rc<dyn HookSet>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.wrapper.cache().forget(self.raw.id(), self.id);
    }
}

/// The adapter's facade over one raw engine object.
///
/// Every member read goes through the interception chain; see
/// [`Handle::get`]. Clones are the same handle; use [`Handle::ptr_eq`] to
/// compare identity.
#[derive(Clone)]
pub struct Handle(Rc<HandleInner>);

impl Handle {
    pub(crate) fn new(raw: RawHandle, wrapper: Wrapper) -> Self {
        Handle(Rc::new(HandleInner {
            id: WrapperId::allocate(),
            raw,
            wrapper,
            overlay: None,
        }))
    }

    /// A second facade over `raw` with its own hooks. It unwraps to `raw`
    /// but is never what `wrap(raw)` returns.
    pub(crate) fn facade(raw: RawHandle, wrapper: Wrapper, overlay: Rc<dyn HookSet>) -> Self {
        let handle = Handle(Rc::new(HandleInner {
            id: WrapperId::allocate(),
            raw,
            wrapper,
            overlay: Some(overlay),
        }));
        handle
            .0
            .wrapper
            .cache()
            .insert_reverse(handle.id(), &handle.0.raw);
        handle
    }

    pub(crate) fn from_inner(inner: Rc<HandleInner>) -> Self {
        Handle(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<HandleInner> {
        Rc::downgrade(&self.0)
    }

    pub fn id(&self) -> WrapperId {
        self.0.id
    }

    /// The raw object behind this handle.
    pub fn raw(&self) -> &RawHandle {
        &self.0.raw
    }

    pub fn kind(&self) -> HandleKind {
        self.0.raw.kind()
    }

    /// The wrapper that produced this handle.
    pub fn wrapper(&self) -> &Wrapper {
        &self.0.wrapper
    }

    fn hooks(&self) -> &Rc<dyn HookSet> {
        self.0.overlay.as_ref().unwrap_or_else(|| self.0.wrapper.hooks())
    }

    /// Read a member.
    ///
    /// Hooks registered later are asked first; whatever none of them claims
    /// is read from the raw object and wrapped. Absent members read as
    /// [`Wrapped::Undefined`].
    pub fn get(&self, name: &str) -> Wrapped {
        self.hooks().get(self, name)
    }

    /// Membership check through the same chain as [`Handle::get`].
    pub fn has(&self, name: &str) -> bool {
        self.hooks().has(self, name)
    }

    /// Read a member and call it with this handle as receiver.
    pub fn call(&self, name: &str, args: Vec<Wrapped>) -> Result<Wrapped> {
        match self.get(name) {
            Wrapped::Method(method) => method.call(&Wrapped::Handle(self.clone()), args),
            _ => Err(Error::NotCallable {
                name: format!("{}.{}", self.kind(), name),
            }),
        }
    }

    /// [`Handle::call`], then await the result if it is a future.
    pub async fn invoke(&self, name: &str, args: Vec<Wrapped>) -> Result<Wrapped> {
        self.call(name, args)?.settle().await
    }

    pub fn ptr_eq(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({} {}{})", self.0.id, self.kind(), self.0.raw.id())
    }
}

type CustomBody = Rc<dyn Fn(&Handle, Vec<Wrapped>) -> Result<Wrapped>>;

enum Body {
    Native(NativeMethod),
    Custom(CustomBody),
}

struct MethodInner {
    name: String,
    body: Body,
}

/// A callable member of a wrapped handle.
///
/// Native methods are retargeted on every call: the receiver and the
/// arguments are unwrapped, the engine method runs against the raw
/// receiver, and its result is wrapped.
#[derive(Clone)]
pub struct Method(Rc<MethodInner>);

impl Method {
    /// A method implemented by the adapter (or a hook).
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&Handle, Vec<Wrapped>) -> Result<Wrapped> + 'static,
    ) -> Self {
        Method(Rc::new(MethodInner {
            name: name.into(),
            body: Body::Custom(Rc::new(body)),
        }))
    }

    pub(crate) fn native(native: NativeMethod) -> Self {
        Method(Rc::new(MethodInner {
            name: native.name().to_string(),
            body: Body::Native(native),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The engine method behind this one, if any.
    pub fn as_native(&self) -> Option<&NativeMethod> {
        match &self.0.body {
            Body::Native(m) => Some(m),
            Body::Custom(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &Method) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Call with `this` as receiver.
    pub fn call(&self, this: &Wrapped, args: Vec<Wrapped>) -> Result<Wrapped> {
        match &self.0.body {
            Body::Native(native) => call_native(native, this, args),
            Body::Custom(body) => match this {
                Wrapped::Handle(handle) => body(handle, args),
                _ => Err(Error::NotAHandle {
                    expected: "a wrapped handle as receiver",
                }),
            },
        }
    }
}

fn call_native(native: &NativeMethod, this: &Wrapped, args: Vec<Wrapped>) -> Result<Wrapped> {
    let Wrapped::Handle(handle) = this else {
        return Err(NativeError::type_error(format!(
            "Illegal invocation of {}.{}",
            native.kind(),
            native.name()
        ))
        .into());
    };
    let wrapper = handle.wrapper();
    let receiver = wrapper.unwrap_arg(this)?;
    let args = args
        .iter()
        .map(|a| wrapper.unwrap_arg(a))
        .collect::<Result<Vec<_>>>()?;

    trace!(receiver = ?handle, method = native.name(), "calling native method");
    let result = native.call(&receiver, args)?;

    if handle.kind().is_cursor() && ADVANCE_METHODS.contains(&native.name()) {
        return Ok(wrapper.cursor_step(handle.raw()));
    }
    Ok(wrapper.wrap(result))
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.body {
            Body::Native(m) => write!(f, "Method({}.{})", m.kind(), m.name()),
            Body::Custom(_) => write!(f, "Method({})", self.0.name),
        }
    }
}
