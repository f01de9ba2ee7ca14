//! Typed signal handles.
//!
//! Signals live in the connection registry, addressed by sender and signal
//! index. [`Signal<A>`] pairs the two with the argument tuple type so that
//! connecting and emitting are checked at compile time:
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use horizon_lattice_kernel::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
//! use horizon_lattice_kernel::object::{self, Object, ObjectBase, ObjectId};
//! use horizon_lattice_kernel::signal::Signal;
//!
//! static SLIDER_META: MetaDescriptor = MetaDescriptor::new("Slider", Some(&OBJECT_META))
//!     .with_signals(&[MethodMeta::new("value_changed", &["i32"])]);
//!
//! struct Slider {
//!     base: ObjectBase,
//! }
//!
//! impl Object for Slider {
//!     fn object_id(&self) -> ObjectId {
//!         self.base.id()
//!     }
//!     fn static_meta() -> &'static MetaDescriptor {
//!         &SLIDER_META
//!     }
//! }
//!
//! impl Slider {
//!     fn value_changed(&self) -> Signal<(i32,)> {
//!         Signal::new(self.base.id(), SLIDER_META.signal_offset())
//!     }
//! }
//!
//! let slider = object::register(Slider { base: ObjectBase::new::<Slider>() });
//! let last = Arc::new(AtomicI32::new(0));
//! let seen = last.clone();
//! slider.value_changed().connect(move |(value,)| seen.store(value, Ordering::SeqCst)).unwrap();
//! slider.value_changed().emit((42,));
//! assert_eq!(last.load(Ordering::SeqCst), 42);
//! ```

use std::fmt;
use std::marker::PhantomData;

use crate::connection::{self, ConnectionHandle};
use crate::error::ConnectError;
use crate::logging::targets;
use crate::metatype::{Arguments, FromArguments, IntoArguments};
use crate::object::{self, ObjectId};
use crate::slot::{ConnectionType, Slot};

/// A signal of one object, typed by its argument tuple.
pub struct Signal<A> {
    sender: ObjectId,
    index: usize,
    _args: PhantomData<fn(A)>,
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Signal<A> {}

impl<A> PartialEq for Signal<A> {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender && self.index == other.index
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("sender", &self.sender)
            .field("index", &self.index)
            .finish()
    }
}

impl<A> Signal<A>
where
    A: IntoArguments + FromArguments + 'static,
{
    /// Signal `index` of `sender`.
    pub fn new(sender: ObjectId, index: usize) -> Self {
        Self {
            sender,
            index,
            _args: PhantomData,
        }
    }

    /// Look a signal up by name in the sender's meta descriptor.
    pub fn find(sender: ObjectId, name: &str) -> Option<Self> {
        let core = object::core(sender)?;
        core.meta().index_of_signal(name).map(|index| Self::new(sender, index))
    }

    /// The emitting object.
    pub fn sender(&self) -> ObjectId {
        self.sender
    }

    /// Absolute signal index.
    pub fn index(&self) -> usize {
        self.index
    }

    fn wrap<F>(f: F) -> impl Fn(&Arguments) + Send + Sync + 'static
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        move |args: &Arguments| match A::from_arguments(args) {
            Some(values) => f(values),
            None => {
                tracing::warn!(target: targets::SIGNAL, "signal arguments do not match the slot's parameter types");
            }
        }
    }

    /// Connect a closure with [`ConnectionType::Auto`].
    pub fn connect<F>(&self, f: F) -> Result<ConnectionHandle, ConnectError>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        self.connect_with_type(f, ConnectionType::Auto)
    }

    /// Connect a closure that runs in the sender's thread context.
    pub fn connect_with_type<F>(&self, f: F, kind: ConnectionType) -> Result<ConnectionHandle, ConnectError>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        connection::connect_callable(self.sender, self.index, Self::wrap(f), kind)
    }

    /// Connect a closure that runs in `context`'s thread and is disconnected
    /// when `context` is destroyed.
    pub fn connect_in<F>(&self, context: ObjectId, f: F, kind: ConnectionType) -> Result<ConnectionHandle, ConnectError>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        connection::connect(self.sender, self.index, context, Slot::callable(Self::wrap(f)), kind)
    }

    /// Connect to a slot or signal of `receiver`.
    pub fn connect_to(&self, receiver: ObjectId, slot: Slot, kind: ConnectionType) -> Result<ConnectionHandle, ConnectError> {
        connection::connect(self.sender, self.index, receiver, slot, kind)
    }

    /// Connect a closure and disconnect it when the guard is dropped.
    pub fn connect_scoped<F>(&self, f: F) -> Result<ConnectionGuard, ConnectError>
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        self.connect(f).map(ConnectionGuard::new)
    }

    /// Disconnect every connection of this signal.
    pub fn disconnect_all(&self) -> bool {
        connection::disconnect_matching(self.sender, Some(self.index), None, None)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        connection::receivers(self.sender, self.index)
    }

    /// Whether anything is connected, including "all signals" connections.
    pub fn is_connected(&self) -> bool {
        connection::is_signal_connected(self.sender, self.index)
    }

    /// Emit the signal.
    pub fn emit(&self, args: A) {
        connection::emit(self.sender, self.index, &args.into_arguments());
    }
}

/// Disconnects its connection when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard disconnects immediately"]
pub struct ConnectionGuard {
    handle: Option<ConnectionHandle>,
}

impl ConnectionGuard {
    /// Take ownership of `handle`.
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle: Some(handle) }
    }

    /// The guarded connection.
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Keep the connection alive beyond the guard.
    pub fn release(mut self) -> Option<ConnectionHandle> {
        self.handle.take()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.disconnect();
        }
    }
}

static_assertions::assert_impl_all!(Signal<(i32, String)>: Send, Sync, Copy);
static_assertions::assert_impl_all!(ConnectionGuard: Send, Sync);
