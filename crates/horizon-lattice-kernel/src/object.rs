//! Object model for the Horizon Lattice kernel.
//!
//! Provides the base object system with:
//! - Unique object identifiers via arena-based storage
//! - Parent-child ownership with cascading destruction
//! - Thread affinity and moving objects between threads
//! - Synchronous event delivery through event filters and handlers
//! - Dynamic properties and per-object timers
//!
//! # Key Types
//!
//! - [`Object`] - Trait implemented by every object type
//! - [`ObjectBase`] - Helper struct owning an object's registration
//! - [`ObjectId`] - Stable, generational handle to an object
//! - [`ObjectCore`] - Shared per-object state read by the signal and event machinery
//! - [`ObjectRegistry`] - The process-wide object arena
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use horizon_lattice_kernel::object::{self, Object, ObjectBase, ObjectId};
//!
//! struct Document {
//!     base: ObjectBase,
//! }
//!
//! impl Object for Document {
//!     fn object_id(&self) -> ObjectId {
//!         self.base.id()
//!     }
//! }
//!
//! let doc = object::register(Document { base: ObjectBase::new::<Document>() });
//! doc.base.set_name("report");
//! let page = ObjectBase::with_parent::<Document>(doc.base.id());
//! assert_eq!(doc.base.children(), vec![page.id()]);
//! assert_eq!(doc.base.find_child("report"), None);
//! ```

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use slotmap::{new_key_type, Key, SlotMap};
use thiserror::Error;

use crate::application;
use crate::connection;
use crate::error::{DispatcherError, KernelError, Result};
use crate::event::{Event, EventPriority, EventType};
use crate::logging::targets;
use crate::meta::{MetaDescriptor, DESTROYED_SIGNAL, OBJECT_META, OBJECT_NAME_CHANGED_SIGNAL, SIGNAL_BITMAP_BITS};
use crate::metatype::{Arguments, IntoArguments, Value};
use crate::posted;
use crate::slot::{self, Slot};
use crate::thread::ThreadData;
use crate::timer::{TimerId, TimerInfo, TimerType};

new_key_type! {
    /// A unique identifier for an object.
    ///
    /// `ObjectId`s are generational: once the object is destroyed the id
    /// stays invalid forever, even if its slot is reused.
    pub struct ObjectId;
}

impl ObjectId {
    /// Convert the ObjectId to a raw u64 value.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Create an ObjectId from a raw u64 value.
    ///
    /// The id is not checked against the registry.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }

    /// Whether the object still exists.
    pub fn is_valid(self) -> bool {
        global_registry().contains(self)
    }
}

/// Errors that can occur during object operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// The object ID is invalid or has been destroyed.
    #[error("invalid or destroyed object id {0:?}")]
    InvalidObjectId(ObjectId),
    /// Attempted to set an object as its own parent or ancestor.
    #[error("cannot set an object as its own parent or ancestor")]
    CircularParentage,
    /// Parent and child would live in different threads.
    #[error("cannot set parent, new parent is in a different thread")]
    CrossThreadParent,
    /// Only parentless objects can change threads.
    #[error("cannot move objects with a parent")]
    HasParent,
    /// An operation restricted to the object's thread was called elsewhere.
    #[error("{0} must be called from the object's thread")]
    WrongThread(&'static str),
    /// Filter and watched object live in different threads.
    #[error("cannot filter events for objects in a different thread")]
    CrossThreadFilter,
}

/// Result type for object operations.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;

/// Shared per-object state.
///
/// Everything the signal and event machinery needs without touching the
/// object arena lives here, behind atomics and small locks.
pub struct ObjectCore {
    id: ObjectId,
    meta: &'static MetaDescriptor,
    type_name: &'static str,
    thread: RwLock<Arc<ThreadData>>,
    being_destroyed: AtomicBool,
    signals_blocked: AtomicBool,
    /// Events for this object sitting in a posted-event list. Changed under that list's lock.
    pub(crate) posted_events: AtomicUsize,
    connected_signals: AtomicU64,
    slow_emissions: AtomicU64,
    current_sender: Mutex<Option<(ObjectId, usize)>>,
    event_filters: Mutex<Vec<ObjectId>>,
}

impl ObjectCore {
    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The object's class descriptor.
    pub fn meta(&self) -> &'static MetaDescriptor {
        self.meta
    }

    /// Rust type name the object was created for.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The thread the object lives in.
    pub fn thread(&self) -> Arc<ThreadData> {
        self.thread.read().clone()
    }

    pub(crate) fn set_thread(&self, data: Arc<ThreadData>) {
        *self.thread.write() = data;
    }

    /// Whether the object lives in the calling thread.
    pub fn in_current_thread(&self) -> bool {
        self.thread.read().is_current()
    }

    /// Whether destruction has started.
    pub fn is_being_destroyed(&self) -> bool {
        self.being_destroyed.load(Ordering::Acquire)
    }

    /// Whether signal emission is blocked.
    pub fn signals_blocked(&self) -> bool {
        self.signals_blocked.load(Ordering::Acquire)
    }

    /// Number of emissions that went past the unconnected-signal check.
    pub fn slow_path_emissions(&self) -> u64 {
        self.slow_emissions.load(Ordering::Relaxed)
    }

    pub(crate) fn count_slow_emission(&self) {
        self.slow_emissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn posted_events(&self) -> usize {
        self.posted_events.load(Ordering::Acquire)
    }

    /// Whether `signal` may have connections. Signals past the bitmap
    /// always answer `true`.
    pub(crate) fn maybe_connected(&self, signal: usize) -> bool {
        if signal >= SIGNAL_BITMAP_BITS {
            return true;
        }
        self.connected_signals.load(Ordering::Acquire) & (1u64 << signal) != 0
    }

    pub(crate) fn set_connected_signals(&self, bits: u64) {
        self.connected_signals.store(bits, Ordering::Release);
    }

    pub(crate) fn mark_connected(&self, bits: u64) {
        self.connected_signals.fetch_or(bits, Ordering::AcqRel);
    }

    fn current_sender(&self) -> Option<(ObjectId, usize)> {
        *self.current_sender.lock()
    }
}

impl fmt::Debug for ObjectCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCore")
            .field("id", &self.id)
            .field("class", &self.meta.class_name())
            .field("thread", &self.thread.read().serial())
            .field("being_destroyed", &self.is_being_destroyed())
            .finish()
    }
}

/// Records the sender of the slot running on an object; restores the
/// previous sender when dropped so nested invocations unwind correctly.
pub(crate) struct SenderGuard<'a> {
    core: &'a ObjectCore,
    previous: Option<(ObjectId, usize)>,
}

impl<'a> SenderGuard<'a> {
    pub(crate) fn new(core: &'a ObjectCore, sender: Option<(ObjectId, usize)>) -> Self {
        let previous = std::mem::replace(&mut *core.current_sender.lock(), sender);
        Self { core, previous }
    }
}

impl Drop for SenderGuard<'_> {
    fn drop(&mut self) {
        *self.core.current_sender.lock() = self.previous;
    }
}

struct ObjectData {
    core: Arc<ObjectCore>,
    name: String,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    properties: Vec<(String, Value)>,
    instance: Option<Weak<dyn Object>>,
}

/// The process-wide object arena.
///
/// The registry lock is never held while calling into user code or while
/// acquiring connection or posted-event locks.
pub struct ObjectRegistry {
    objects: RwLock<SlotMap<ObjectId, ObjectData>>,
}

static GLOBAL_REGISTRY: OnceLock<ObjectRegistry> = OnceLock::new();

/// The global object registry.
pub fn global_registry() -> &'static ObjectRegistry {
    GLOBAL_REGISTRY.get_or_init(|| ObjectRegistry {
        objects: RwLock::new(SlotMap::with_key()),
    })
}

impl ObjectRegistry {
    fn insert(&self, meta: &'static MetaDescriptor, type_name: &'static str, thread: Arc<ThreadData>) -> Arc<ObjectCore> {
        let mut objects = self.objects.write();
        let id = objects.insert_with_key(|id| ObjectData {
            core: Arc::new(ObjectCore {
                id,
                meta,
                type_name,
                thread: RwLock::new(thread),
                being_destroyed: AtomicBool::new(false),
                signals_blocked: AtomicBool::new(false),
                posted_events: AtomicUsize::new(0),
                connected_signals: AtomicU64::new(0),
                slow_emissions: AtomicU64::new(0),
                current_sender: Mutex::new(None),
                event_filters: Mutex::new(Vec::new()),
            }),
            name: String::new(),
            parent: None,
            children: Vec::new(),
            properties: Vec::new(),
            instance: None,
        });
        objects[id].core.clone()
    }

    fn remove(&self, id: ObjectId) {
        self.objects.write().remove(id);
    }

    /// Whether the object exists.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.read().contains_key(id)
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Objects without a parent.
    pub fn root_objects(&self) -> Vec<ObjectId> {
        self.objects
            .read()
            .iter()
            .filter(|(_, data)| data.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// The object's shared core.
    pub fn core(&self, id: ObjectId) -> Option<Arc<ObjectCore>> {
        self.objects.read().get(id).map(|data| data.core.clone())
    }

    /// The bound handler instance, if still alive.
    pub fn instance(&self, id: ObjectId) -> Option<Arc<dyn Object>> {
        self.objects
            .read()
            .get(id)
            .and_then(|data| data.instance.as_ref())
            .and_then(Weak::upgrade)
    }

    fn bind(&self, id: ObjectId, instance: Weak<dyn Object>) -> ObjectResult<()> {
        let mut objects = self.objects.write();
        let data = objects.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))?;
        data.instance = Some(instance);
        Ok(())
    }

    /// The object's class name.
    pub fn class_name(&self, id: ObjectId) -> ObjectResult<&'static str> {
        self.objects
            .read()
            .get(id)
            .map(|data| data.core.meta.class_name())
            .ok_or(ObjectError::InvalidObjectId(id))
    }

    /// The object's name.
    pub fn object_name(&self, id: ObjectId) -> ObjectResult<String> {
        self.objects
            .read()
            .get(id)
            .map(|data| data.name.clone())
            .ok_or(ObjectError::InvalidObjectId(id))
    }

    /// Returns whether the name changed.
    fn set_object_name(&self, id: ObjectId, name: &str) -> ObjectResult<bool> {
        let mut objects = self.objects.write();
        let data = objects.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))?;
        if data.name == name {
            return Ok(false);
        }
        data.name = name.to_string();
        Ok(true)
    }

    /// The object's parent.
    pub fn parent(&self, id: ObjectId) -> ObjectResult<Option<ObjectId>> {
        self.objects
            .read()
            .get(id)
            .map(|data| data.parent)
            .ok_or(ObjectError::InvalidObjectId(id))
    }

    /// The object's children, in insertion order.
    pub fn children(&self, id: ObjectId) -> ObjectResult<Vec<ObjectId>> {
        self.objects
            .read()
            .get(id)
            .map(|data| data.children.clone())
            .ok_or(ObjectError::InvalidObjectId(id))
    }

    /// All descendants in depth-first pre-order, excluding `id`.
    pub fn descendants(&self, id: ObjectId) -> ObjectResult<Vec<ObjectId>> {
        let objects = self.objects.read();
        let root = objects.get(id).ok_or(ObjectError::InvalidObjectId(id))?;
        let mut result = Vec::new();
        let mut stack: Vec<ObjectId> = root.children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            result.push(next);
            if let Some(data) = objects.get(next) {
                stack.extend(data.children.iter().rev().copied());
            }
        }
        Ok(result)
    }

    /// Whether `ancestor` is `id` or one of its ancestors.
    fn is_ancestor_or_self(&self, ancestor: ObjectId, id: ObjectId) -> bool {
        let objects = self.objects.read();
        let mut current = Some(id);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = objects.get(candidate).and_then(|data| data.parent);
        }
        false
    }

    /// First descendant named `name`: direct children first, then recursively.
    pub fn find_child(&self, id: ObjectId, name: &str) -> ObjectResult<Option<ObjectId>> {
        let objects = self.objects.read();
        let root = objects.get(id).ok_or(ObjectError::InvalidObjectId(id))?;
        let mut level = root.children.clone();
        while !level.is_empty() {
            if let Some(found) = level
                .iter()
                .copied()
                .find(|child| objects.get(*child).is_some_and(|data| data.name == name))
            {
                return Ok(Some(found));
            }
            level = level
                .iter()
                .filter_map(|child| objects.get(*child))
                .flat_map(|data| data.children.iter().copied())
                .collect();
        }
        Ok(None)
    }

    /// All descendants named `name`, depth-first.
    pub fn find_children(&self, id: ObjectId, name: &str) -> ObjectResult<Vec<ObjectId>> {
        let descendants = self.descendants(id)?;
        let objects = self.objects.read();
        Ok(descendants
            .into_iter()
            .filter(|child| objects.get(*child).is_some_and(|data| data.name == name))
            .collect())
    }

    /// Move `id` under `parent`. Returns the previous parent.
    fn reparent(&self, id: ObjectId, parent: Option<ObjectId>) -> ObjectResult<Option<ObjectId>> {
        let mut objects = self.objects.write();
        if let Some(parent) = parent {
            if !objects.contains_key(parent) {
                return Err(ObjectError::InvalidObjectId(parent));
            }
        }
        let data = objects.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))?;
        let old = std::mem::replace(&mut data.parent, parent);
        if let Some(old) = old {
            if let Some(old_data) = objects.get_mut(old) {
                old_data.children.retain(|child| *child != id);
            }
        }
        if let Some(parent) = parent {
            if let Some(parent_data) = objects.get_mut(parent) {
                parent_data.children.push(id);
            }
        }
        Ok(old)
    }

    fn set_property(&self, id: ObjectId, name: &str, value: Value) -> ObjectResult<()> {
        let mut objects = self.objects.write();
        let data = objects.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))?;
        match data.properties.iter_mut().find(|(key, _)| key == name) {
            Some((_, slot)) => *slot = value,
            None => data.properties.push((name.to_string(), value)),
        }
        Ok(())
    }

    fn remove_property(&self, id: ObjectId, name: &str) -> ObjectResult<bool> {
        let mut objects = self.objects.write();
        let data = objects.get_mut(id).ok_or(ObjectError::InvalidObjectId(id))?;
        let before = data.properties.len();
        data.properties.retain(|(key, _)| key != name);
        Ok(before != data.properties.len())
    }

    /// A copy of a dynamic property.
    pub fn property(&self, id: ObjectId, name: &str) -> ObjectResult<Option<Value>> {
        let objects = self.objects.read();
        let data = objects.get(id).ok_or(ObjectError::InvalidObjectId(id))?;
        Ok(data
            .properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone()))
    }

    /// Names of the dynamic properties, in the order they were first set.
    pub fn dynamic_property_names(&self, id: ObjectId) -> ObjectResult<Vec<String>> {
        let objects = self.objects.read();
        let data = objects.get(id).ok_or(ObjectError::InvalidObjectId(id))?;
        Ok(data.properties.iter().map(|(key, _)| key.clone()).collect())
    }
}

/// The trait implemented by every object type.
///
/// Handlers take `&self`; object types keep mutable state behind their own
/// locks or atomics because events and slots may reach them re-entrantly.
///
/// Returning `false` from [`event`](Self::event) lets the kernel's default
/// handling run, which dispatches to the more specific hooks.
pub trait Object: Any + Send + Sync {
    /// This object's id.
    fn object_id(&self) -> ObjectId;

    /// Class descriptor used when the object is created through [`ObjectBase::new`].
    fn static_meta() -> &'static MetaDescriptor
    where
        Self: Sized,
    {
        &OBJECT_META
    }

    /// Handle an event. Return `true` if it was handled.
    fn event(&self, _event: &mut Event) -> bool {
        false
    }

    /// Filter an event addressed to `watched`. Return `true` to stop it.
    fn event_filter(&self, _watched: ObjectId, _event: &mut Event) -> bool {
        false
    }

    /// A timer started by this object fired.
    fn timer_event(&self, _event: &Event) {}

    /// A child was added or removed.
    fn child_event(&self, _event: &Event) {}

    /// A user-defined event arrived.
    fn custom_event(&self, _event: &mut Event) {}

    /// Invoke the slot with absolute index `index`. Return `false` if it
    /// is not a slot of this object.
    fn invoke_method(&self, _index: usize, _args: &Arguments) -> bool {
        false
    }

    /// Something connected to `signal` of this object (`None`: to all signals).
    fn connect_notify(&self, _signal: Option<usize>) {}

    /// Something disconnected from `signal` of this object.
    fn disconnect_notify(&self, _signal: Option<usize>) {}
}

/// Helper owning an object's registration.
///
/// Embed one in every object type. Creating it registers the object in the
/// calling thread; dropping it destroys the object.
pub struct ObjectBase {
    id: ObjectId,
    core: Arc<ObjectCore>,
}

impl ObjectBase {
    /// Register a parentless object of type `T`.
    pub fn new<T: Object>() -> Self {
        Self::with_meta(T::static_meta(), std::any::type_name::<T>(), None)
    }

    /// Register an object of type `T` as a child of `parent`.
    ///
    /// If `parent` lives in another thread the object is created parentless
    /// and a warning is logged.
    pub fn with_parent<T: Object>(parent: ObjectId) -> Self {
        Self::with_meta(T::static_meta(), std::any::type_name::<T>(), Some(parent))
    }

    /// Register an object with an explicit descriptor.
    pub fn with_meta(meta: &'static MetaDescriptor, type_name: &'static str, parent: Option<ObjectId>) -> Self {
        let current = ThreadData::current();
        let core = global_registry().insert(meta, type_name, current.clone());
        let id = core.id();
        tracing::trace!(target: targets::OBJECT, ?id, class = meta.class_name(), "object created");

        if let Some(parent) = parent {
            match global_registry().core(parent) {
                Some(parent_core) if parent_core.thread().serial() != current.serial() => {
                    tracing::warn!(
                        target: targets::OBJECT,
                        ?parent,
                        "cannot create children for a parent that is in a different thread"
                    );
                }
                Some(_) => {
                    if let Err(err) = set_parent(id, Some(parent)) {
                        tracing::warn!(target: targets::OBJECT, ?parent, %err, "could not attach new object to parent");
                    }
                }
                None => {
                    tracing::warn!(target: targets::OBJECT, ?parent, "parent does not exist");
                }
            }
        }

        Self { id, core }
    }

    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The object's shared core.
    pub fn core(&self) -> &Arc<ObjectCore> {
        &self.core
    }

    /// The object's class descriptor.
    pub fn meta(&self) -> &'static MetaDescriptor {
        self.core.meta()
    }

    /// Whether the object still exists.
    pub fn is_alive(&self) -> bool {
        self.id.is_valid()
    }

    /// The object's name.
    pub fn name(&self) -> String {
        global_registry().object_name(self.id).unwrap_or_default()
    }

    /// Set the object's name.
    pub fn set_name(&self, name: impl Into<String>) {
        let _ = set_object_name(self.id, &name.into());
    }

    /// The parent object.
    pub fn parent(&self) -> Option<ObjectId> {
        global_registry().parent(self.id).ok().flatten()
    }

    /// Reparent the object.
    pub fn set_parent(&self, parent: Option<ObjectId>) -> ObjectResult<()> {
        set_parent(self.id, parent)
    }

    /// The children, in insertion order.
    pub fn children(&self) -> Vec<ObjectId> {
        global_registry().children(self.id).unwrap_or_default()
    }

    /// First descendant with the given name.
    pub fn find_child(&self, name: &str) -> Option<ObjectId> {
        global_registry().find_child(self.id, name).ok().flatten()
    }

    /// All descendants with the given name.
    pub fn find_children(&self, name: &str) -> Vec<ObjectId> {
        global_registry().find_children(self.id, name).unwrap_or_default()
    }

    /// The thread the object lives in.
    pub fn thread(&self) -> Arc<ThreadData> {
        self.core.thread()
    }

    /// Move the object and its children to `target`.
    pub fn move_to_thread(&self, target: &Arc<ThreadData>) -> ObjectResult<()> {
        move_to_thread(self.id, target)
    }

    /// Emit signal `signal` with `args`.
    pub fn emit(&self, signal: usize, args: impl IntoArguments) {
        connection::activate(&self.core, signal, &args.into_arguments());
    }

    /// Block or unblock signal emission. Returns the previous state.
    pub fn block_signals(&self, block: bool) -> bool {
        self.core.signals_blocked.swap(block, Ordering::AcqRel)
    }

    /// Whether signal emission is blocked.
    pub fn signals_blocked(&self) -> bool {
        self.core.signals_blocked()
    }

    /// The object whose signal invoked the running slot.
    pub fn sender(&self) -> Option<ObjectId> {
        sender(self.id)
    }

    /// Index of the signal that invoked the running slot.
    pub fn sender_signal_index(&self) -> Option<usize> {
        sender_signal_index(self.id)
    }

    /// Number of live connections to `signal`.
    pub fn receivers(&self, signal: usize) -> usize {
        connection::receivers(self.id, signal)
    }

    /// Whether anything is connected to `signal`.
    pub fn is_signal_connected(&self, signal: usize) -> bool {
        connection::is_signal_connected(self.id, signal)
    }

    /// Install `filter` as an event filter on this object.
    pub fn install_event_filter(&self, filter: ObjectId) -> ObjectResult<()> {
        install_event_filter(self.id, filter)
    }

    /// Remove an event filter.
    pub fn remove_event_filter(&self, filter: ObjectId) {
        remove_event_filter(self.id, filter);
    }

    /// Start a repeating timer delivering timer events to this object.
    pub fn start_timer(&self, interval: Duration, timer_type: TimerType) -> Result<TimerId> {
        start_timer(self.id, interval, timer_type)
    }

    /// Stop a timer started by this object.
    pub fn kill_timer(&self, id: TimerId) -> Result<()> {
        kill_timer(self.id, id)
    }

    /// Set a dynamic property.
    pub fn set_property<T: Clone + Send + Sync + 'static>(&self, name: &str, value: T) -> ObjectResult<()> {
        set_property(self.id, name, Value::new(value))
    }

    /// Read a dynamic property as `T`.
    pub fn property<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        global_registry()
            .property(self.id, name)
            .ok()
            .flatten()
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Remove a dynamic property. Returns whether it existed.
    pub fn remove_property(&self, name: &str) -> bool {
        remove_property(self.id, name).unwrap_or(false)
    }

    /// Names of the dynamic properties.
    pub fn dynamic_property_names(&self) -> Vec<String> {
        global_registry().dynamic_property_names(self.id).unwrap_or_default()
    }

    /// Schedule destruction once control returns to the event loop.
    pub fn delete_later(&self) {
        delete_later(self.id);
    }

    /// Destroy the object now.
    pub fn destroy(&self) {
        destroy(self.id);
    }
}

impl fmt::Debug for ObjectBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBase")
            .field("id", &self.id)
            .field("class", &self.core.meta().class_name())
            .finish()
    }
}

impl Drop for ObjectBase {
    fn drop(&mut self) {
        destroy(self.id);
    }
}

/// Wrap `value` in an `Arc` and bind it as the event and slot handler of its object.
pub fn register<T: Object>(value: T) -> Arc<T> {
    let object = Arc::new(value);
    bind_instance(&object);
    object
}

/// Bind an existing `Arc` as the handler of its object.
pub fn bind_instance<T: Object>(object: &Arc<T>) {
    let weak: Weak<dyn Object> = Arc::downgrade(object) as Weak<dyn Object>;
    if let Err(err) = global_registry().bind(object.object_id(), weak) {
        tracing::warn!(target: targets::OBJECT, %err, "cannot bind handler");
    }
}

/// The shared core of `id`.
pub fn core(id: ObjectId) -> Option<Arc<ObjectCore>> {
    global_registry().core(id)
}

/// The bound handler of `id`.
pub fn instance(id: ObjectId) -> Option<Arc<dyn Object>> {
    global_registry().instance(id)
}

/// Rename an object; emits `object_name_changed` if the name changed.
pub fn set_object_name(id: ObjectId, name: &str) -> ObjectResult<()> {
    if global_registry().set_object_name(id, name)? {
        if let Some(core) = core(id) {
            connection::activate(&core, OBJECT_NAME_CHANGED_SIGNAL, &Arguments::new().with(name.to_string()));
        }
    }
    Ok(())
}

/// Reparent `id`.
///
/// Fails if the new parent lives in another thread or is `id` itself or
/// one of its descendants. The old parent receives `ChildRemoved`, the new
/// one `ChildAdded`.
pub fn set_parent(id: ObjectId, parent: Option<ObjectId>) -> ObjectResult<()> {
    let core = core(id).ok_or(ObjectError::InvalidObjectId(id))?;
    if let Some(parent) = parent {
        let parent_core = global_registry().core(parent).ok_or(ObjectError::InvalidObjectId(parent))?;
        if parent_core.thread().serial() != core.thread().serial() {
            tracing::warn!(target: targets::OBJECT, ?id, ?parent, "cannot set parent, new parent is in a different thread");
            return Err(ObjectError::CrossThreadParent);
        }
        if global_registry().is_ancestor_or_self(id, parent) {
            return Err(ObjectError::CircularParentage);
        }
    }

    let old = global_registry().reparent(id, parent)?;
    if old == parent {
        return Ok(());
    }
    if let Some(old) = old {
        if core_alive(old) {
            send_event(old, &mut Event::child_removed(id));
        }
    }
    if let Some(parent) = parent {
        send_event(parent, &mut Event::child_added(id));
    }
    Ok(())
}

fn core_alive(id: ObjectId) -> bool {
    core(id).is_some_and(|core| !core.is_being_destroyed())
}

/// Destroy `id` now.
///
/// Idempotent. `destroyed` is emitted even when signals are blocked, then
/// all connections are severed, posted events withdrawn, timers stopped,
/// children destroyed front to back and the object detached from its parent.
pub fn destroy(id: ObjectId) {
    let Some(core) = core(id) else {
        return;
    };
    if core.being_destroyed.swap(true, Ordering::AcqRel) {
        return;
    }
    tracing::debug!(target: targets::OBJECT, ?id, class = core.meta().class_name(), "destroying object");

    connection::activate(&core, DESTROYED_SIGNAL, &Arguments::new().with(id));
    connection::teardown(&core);

    if core.posted_events() > 0 {
        posted::remove_posted_events_for(&core, None);
    }

    let data = core.thread();
    if let Some(dispatcher) = data.dispatcher() {
        if data.is_current() {
            dispatcher.unregister_timers(id);
        } else if !dispatcher.registered_timers(id).is_empty() {
            tracing::warn!(target: targets::OBJECT, ?id, "timers cannot be stopped from another thread");
        }
    }

    for child in global_registry().children(id).unwrap_or_default() {
        destroy(child);
    }

    if let Ok(Some(parent)) = global_registry().reparent(id, None) {
        if core_alive(parent) {
            send_event(parent, &mut Event::child_removed(id));
        }
    }

    global_registry().remove(id);
}

/// Post a `DeferredDelete` for `id`.
pub fn delete_later(id: ObjectId) {
    posted::post_event(id, Event::deferred_delete(), EventPriority::Normal);
}

/// Move `id` and its descendants to `target`.
///
/// Only parentless objects may move, and only from their current thread.
/// Every moved object receives `ThreadChange` first; events already posted
/// to them follow them to the new thread, as do their timers.
pub fn move_to_thread(id: ObjectId, target: &Arc<ThreadData>) -> ObjectResult<()> {
    let core = core(id).ok_or(ObjectError::InvalidObjectId(id))?;
    let current = core.thread();
    if current.serial() == target.serial() {
        return Ok(());
    }
    if global_registry().parent(id)?.is_some() {
        tracing::warn!(target: targets::OBJECT, ?id, "cannot move objects with a parent");
        return Err(ObjectError::HasParent);
    }
    if !current.is_current() {
        tracing::warn!(
            target: targets::OBJECT,
            ?id,
            "current thread is not the object's thread, cannot move to target thread"
        );
        return Err(ObjectError::WrongThread("move_to_thread"));
    }

    let mut subtree = vec![id];
    subtree.extend(global_registry().descendants(id)?);
    for object in &subtree {
        send_event(*object, &mut Event::new(EventType::ThreadChange));
    }

    let cores: Vec<Arc<ObjectCore>> = subtree.iter().filter_map(|object| self::core(*object)).collect();
    posted::rehome(&cores, &current, target);
    tracing::debug!(
        target: targets::OBJECT,
        ?id,
        from = current.serial(),
        to = target.serial(),
        moved = cores.len(),
        "moved object to thread"
    );
    Ok(())
}

/// Deliver `event` to `receiver` synchronously.
///
/// The receiver must live in the calling thread. Application event filters
/// run first, then the receiver's own filters (most recently installed
/// first), then its handler. Returns whether the event was handled.
pub fn send_event(receiver: ObjectId, event: &mut Event) -> bool {
    match core(receiver) {
        Some(core) => notify(&core, event),
        None => {
            tracing::warn!(target: targets::EVENT, ?receiver, event = ?event.event_type(), "unexpected null receiver");
            false
        }
    }
}

pub(crate) fn notify(core: &Arc<ObjectCore>, event: &mut Event) -> bool {
    if application::is_closing_down() {
        return true;
    }
    let data = core.thread();
    if !data.is_current() {
        tracing::warn!(
            target: targets::EVENT,
            receiver = ?core.id(),
            class = core.meta().class_name(),
            "cannot send events to objects owned by a different thread"
        );
        return false;
    }
    let _level = data.enter_level();
    let receiver = core.id();
    tracing::trace!(target: targets::EVENT, ?receiver, event = ?event.event_type(), "delivering event");

    if data.is_main() {
        for filter in application::app_event_filters() {
            let Some(filter_core) = self::core(filter) else {
                continue;
            };
            if !filter_core.thread().is_main() {
                tracing::warn!(target: targets::EVENT, ?filter, "application event filter cannot be in a different thread");
                continue;
            }
            if instance(filter).is_some_and(|f| f.event_filter(receiver, event)) {
                return true;
            }
        }
    }

    let filters = core.event_filters.lock().clone();
    for filter in filters {
        let Some(filter_core) = self::core(filter) else {
            continue;
        };
        if filter_core.thread().serial() != data.serial() {
            tracing::warn!(target: targets::EVENT, ?filter, "object event filter cannot be in a different thread");
            continue;
        }
        if instance(filter).is_some_and(|f| f.event_filter(receiver, event)) {
            return true;
        }
    }

    let handler = instance(receiver);
    if handler.as_ref().is_some_and(|h| h.event(event)) {
        return true;
    }
    default_event(core, handler.as_deref(), event)
}

fn default_event(core: &Arc<ObjectCore>, handler: Option<&dyn Object>, event: &mut Event) -> bool {
    match event.event_type() {
        EventType::MetaCall => {
            if let Some(call) = event.take_meta_call() {
                call.execute(core);
            }
            true
        }
        EventType::DeferredDelete => {
            destroy(core.id());
            true
        }
        EventType::Timer => {
            if let Some(handler) = handler {
                handler.timer_event(event);
            }
            true
        }
        EventType::ChildAdded | EventType::ChildRemoved => {
            if let Some(handler) = handler {
                handler.child_event(event);
            }
            true
        }
        EventType::ThreadChange => {
            carry_timers(core);
            true
        }
        EventType::User(_) => {
            if let Some(handler) = handler {
                handler.custom_event(event);
            }
            true
        }
        _ => false,
    }
}

/// Unregister the object's timers here and queue their registration on
/// whichever thread the object lives in when the queued call runs.
fn carry_timers(core: &Arc<ObjectCore>) {
    let Some(dispatcher) = core.thread().dispatcher() else {
        return;
    };
    let id = core.id();
    let timers = dispatcher.registered_timers(id);
    if timers.is_empty() {
        return;
    }
    dispatcher.unregister_timers(id);
    let reregister = Slot::callable(move |_| reregister_timers(id, &timers));
    if let Err(err) = slot::queue_call(core, None, reregister, &Arguments::new(), None) {
        tracing::warn!(target: targets::TIMER, ?id, %err, "could not carry timers to the new thread");
    }
}

fn reregister_timers(id: ObjectId, timers: &[TimerInfo]) {
    let Some(dispatcher) = ThreadData::current().dispatcher() else {
        tracing::warn!(target: targets::TIMER, ?id, "timers cannot be started in a thread without an event dispatcher");
        return;
    };
    for timer in timers {
        if let Err(err) = dispatcher.register_timer(timer.id, timer.interval, timer.timer_type, id) {
            tracing::warn!(target: targets::TIMER, ?id, %err, "could not re-register timer");
        }
    }
}

/// Install `filter` on `object`. Re-installing moves it to the front.
pub fn install_event_filter(object: ObjectId, filter: ObjectId) -> ObjectResult<()> {
    let core = core(object).ok_or(ObjectError::InvalidObjectId(object))?;
    let filter_core = self::core(filter).ok_or(ObjectError::InvalidObjectId(filter))?;
    if core.thread().serial() != filter_core.thread().serial() {
        tracing::warn!(target: targets::OBJECT, ?object, ?filter, "cannot filter events for objects in a different thread");
        return Err(ObjectError::CrossThreadFilter);
    }
    let mut filters = core.event_filters.lock();
    filters.retain(|f| *f != filter && f.is_valid());
    filters.insert(0, filter);
    Ok(())
}

/// Remove `filter` from `object`.
pub fn remove_event_filter(object: ObjectId, filter: ObjectId) {
    if let Some(core) = core(object) {
        core.event_filters.lock().retain(|f| *f != filter);
    }
}

/// Event filters installed on `object`, most recent first.
pub fn event_filters(object: ObjectId) -> Vec<ObjectId> {
    core(object).map(|core| core.event_filters.lock().clone()).unwrap_or_default()
}

/// Start a repeating timer for `object`. Must be called from the object's thread.
pub fn start_timer(object: ObjectId, interval: Duration, timer_type: TimerType) -> Result<TimerId> {
    let core = core(object).ok_or(ObjectError::InvalidObjectId(object))?;
    let data = core.thread();
    if !data.is_current() {
        tracing::warn!(target: targets::TIMER, ?object, "timers cannot be started from another thread");
        return Err(ObjectError::WrongThread("start_timer").into());
    }
    let Some(dispatcher) = data.dispatcher() else {
        tracing::warn!(target: targets::TIMER, ?object, "timers can only be used with threads that have an event dispatcher");
        return Err(DispatcherError::NoDispatcher.into());
    };
    let id = TimerId::allocate();
    dispatcher.register_timer(id, interval, timer_type, object)?;
    Ok(id)
}

/// Stop timer `id` of `object`. Must be called from the object's thread.
pub fn kill_timer(object: ObjectId, id: TimerId) -> Result<()> {
    let core = core(object).ok_or(ObjectError::InvalidObjectId(object))?;
    let data = core.thread();
    if !data.is_current() {
        tracing::warn!(target: targets::TIMER, ?object, "timers cannot be stopped from another thread");
        return Err(ObjectError::WrongThread("kill_timer").into());
    }
    let dispatcher = data.dispatcher().ok_or(KernelError::Dispatcher(DispatcherError::NoDispatcher))?;
    if dispatcher.unregister_timer(id) {
        Ok(())
    } else {
        Err(DispatcherError::InvalidTimer(id).into())
    }
}

/// Set a dynamic property and send `DynamicPropertyChange`.
pub fn set_property(object: ObjectId, name: &str, value: Value) -> ObjectResult<()> {
    global_registry().set_property(object, name, value)?;
    send_event(object, &mut Event::dynamic_property_change(name));
    Ok(())
}

/// Remove a dynamic property; sends `DynamicPropertyChange` if it existed.
pub fn remove_property(object: ObjectId, name: &str) -> ObjectResult<bool> {
    let removed = global_registry().remove_property(object, name)?;
    if removed {
        send_event(object, &mut Event::dynamic_property_change(name));
    }
    Ok(removed)
}

/// The object whose signal invoked the slot now running on `receiver`.
///
/// `None` outside a slot invocation or once the sender is destroyed.
pub fn sender(receiver: ObjectId) -> Option<ObjectId> {
    core(receiver)
        .and_then(|core| core.current_sender())
        .map(|(sender, _)| sender)
        .filter(|sender| sender.is_valid())
}

/// Signal index that invoked the slot now running on `receiver`.
pub fn sender_signal_index(receiver: ObjectId) -> Option<usize> {
    core(receiver)
        .and_then(|core| core.current_sender())
        .filter(|(sender, _)| sender.is_valid())
        .map(|(_, signal)| signal)
}

/// Block or unblock signals of `id`. Returns the previous state.
pub fn block_signals(id: ObjectId, block: bool) -> bool {
    core(id).is_some_and(|core| core.signals_blocked.swap(block, Ordering::AcqRel))
}

static_assertions::assert_impl_all!(ObjectId: Send, Sync);
static_assertions::assert_impl_all!(ObjectCore: Send, Sync);
static_assertions::assert_impl_all!(ObjectBase: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MethodMeta;

    struct Recorder {
        base: ObjectBase,
        events: Mutex<Vec<EventType>>,
        filtered: Mutex<Vec<(ObjectId, EventType)>>,
        swallow: bool,
    }

    impl Recorder {
        fn new(parent: Option<ObjectId>) -> Arc<Self> {
            Self::with_swallow(parent, false)
        }

        fn with_swallow(parent: Option<ObjectId>, swallow: bool) -> Arc<Self> {
            let base = match parent {
                Some(parent) => ObjectBase::with_parent::<Self>(parent),
                None => ObjectBase::new::<Self>(),
            };
            register(Self {
                base,
                events: Mutex::new(Vec::new()),
                filtered: Mutex::new(Vec::new()),
                swallow,
            })
        }
    }

    impl Object for Recorder {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }

        fn event(&self, event: &mut Event) -> bool {
            self.events.lock().push(event.event_type());
            false
        }

        fn event_filter(&self, watched: ObjectId, event: &mut Event) -> bool {
            self.filtered.lock().push((watched, event.event_type()));
            self.swallow
        }
    }

    static NAMED_META: MetaDescriptor =
        MetaDescriptor::new("Named", Some(&OBJECT_META)).with_signals(&[MethodMeta::new("ping", &[])]);

    struct Named {
        base: ObjectBase,
    }

    impl Object for Named {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }

        fn static_meta() -> &'static MetaDescriptor {
            &NAMED_META
        }
    }

    #[test]
    fn test_static_meta_is_used() {
        let named = Named {
            base: ObjectBase::new::<Named>(),
        };
        assert_eq!(named.base.meta().class_name(), "Named");
        assert_eq!(global_registry().class_name(named.object_id()), Ok("Named"));
    }

    #[test]
    fn test_parent_child_and_events() {
        let parent = Recorder::new(None);
        let child = Recorder::new(Some(parent.base.id()));

        assert_eq!(child.base.parent(), Some(parent.base.id()));
        assert_eq!(parent.base.children(), vec![child.base.id()]);
        assert_eq!(*parent.events.lock(), vec![EventType::ChildAdded]);

        child.base.set_parent(None).unwrap();
        assert!(parent.base.children().is_empty());
        assert_eq!(
            *parent.events.lock(),
            vec![EventType::ChildAdded, EventType::ChildRemoved]
        );
    }

    #[test]
    fn test_circular_parentage_rejected() {
        let a = ObjectBase::new::<Named>();
        let b = ObjectBase::with_parent::<Named>(a.id());
        let c = ObjectBase::with_parent::<Named>(b.id());
        assert_eq!(a.set_parent(Some(c.id())), Err(ObjectError::CircularParentage));
        assert_eq!(a.set_parent(Some(a.id())), Err(ObjectError::CircularParentage));
        assert_eq!(c.parent(), Some(b.id()));
    }

    #[test]
    fn test_destroy_cascades_front_to_back() {
        let root = ObjectBase::new::<Named>();
        let first = ObjectBase::with_parent::<Named>(root.id());
        let grandchild = ObjectBase::with_parent::<Named>(first.id());
        let second = ObjectBase::with_parent::<Named>(root.id());

        let order = Arc::new(Mutex::new(Vec::new()));
        for id in [first.id(), grandchild.id(), second.id()] {
            let order = order.clone();
            connection::connect(
                id,
                DESTROYED_SIGNAL,
                id,
                Slot::callable(move |args| order.lock().push(*args.get::<ObjectId>(0).unwrap())),
                crate::slot::ConnectionType::Direct,
            )
            .unwrap();
        }

        root.destroy();
        assert!(!root.is_alive());
        assert!(!first.is_alive());
        assert!(!grandchild.is_alive());
        assert!(!second.is_alive());
        assert_eq!(*order.lock(), vec![first.id(), grandchild.id(), second.id()]);
        // Dropping the bases afterwards is a no-op.
    }

    #[test]
    fn test_destroy_is_idempotent_and_emits_once_when_blocked() {
        let object = ObjectBase::new::<Named>();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        connection::connect(
            object.id(),
            DESTROYED_SIGNAL,
            object.id(),
            Slot::callable(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            crate::slot::ConnectionType::Direct,
        )
        .unwrap();
        object.block_signals(true);
        object.destroy();
        object.destroy();
        destroy(object.id());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_object_name_and_lookup() {
        let root = ObjectBase::new::<Named>();
        let a = ObjectBase::with_parent::<Named>(root.id());
        let b = ObjectBase::with_parent::<Named>(a.id());
        let c = ObjectBase::with_parent::<Named>(root.id());
        b.set_name("target");
        c.set_name("target");

        // Direct children are searched before grandchildren.
        assert_eq!(root.find_child("target"), Some(c.id()));
        assert_eq!(root.find_children("target"), vec![b.id(), c.id()]);
        assert_eq!(root.find_child("missing"), None);

        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        connection::connect(
            a.id(),
            OBJECT_NAME_CHANGED_SIGNAL,
            a.id(),
            Slot::callable(move |args| sink.lock().push(args.get::<String>(0).cloned().unwrap())),
            crate::slot::ConnectionType::Direct,
        )
        .unwrap();
        a.set_name("alpha");
        a.set_name("alpha");
        assert_eq!(*names.lock(), vec!["alpha".to_string()]);
        assert_eq!(a.name(), "alpha");
    }

    #[test]
    fn test_dynamic_properties_send_change_events() {
        let object = Recorder::new(None);
        object.base.set_property("answer", 42i32).unwrap();
        object.base.set_property("label", String::from("x")).unwrap();
        object.base.set_property("answer", 43i32).unwrap();

        assert_eq!(object.base.property::<i32>("answer"), Some(43));
        assert_eq!(object.base.property::<String>("answer"), None);
        assert_eq!(object.base.dynamic_property_names(), vec!["answer", "label"]);
        assert!(object.base.remove_property("label"));
        assert!(!object.base.remove_property("label"));
        assert_eq!(object.events.lock().len(), 4);
        assert!(object
            .events
            .lock()
            .iter()
            .all(|t| *t == EventType::DynamicPropertyChange));
    }

    #[test]
    fn test_event_filters_most_recent_first() {
        let watched = Recorder::new(None);
        let older = Recorder::new(None);
        let newer = Recorder::with_swallow(None, true);

        watched.base.install_event_filter(older.base.id()).unwrap();
        watched.base.install_event_filter(newer.base.id()).unwrap();
        assert_eq!(event_filters(watched.base.id()), vec![newer.base.id(), older.base.id()]);

        let kind = crate::event::register_event_type(None).unwrap();
        assert!(send_event(watched.base.id(), &mut Event::new(kind)));
        assert_eq!(newer.filtered.lock().len(), 1);
        assert!(older.filtered.lock().is_empty());
        assert!(watched.events.lock().is_empty());

        watched.base.remove_event_filter(newer.base.id());
        send_event(watched.base.id(), &mut Event::new(kind));
        assert_eq!(older.filtered.lock().as_slice(), &[(watched.base.id(), kind)]);
        assert_eq!(*watched.events.lock(), vec![kind]);
    }

    #[test]
    fn test_cross_thread_send_is_rejected() {
        let object = Arc::new(Recorder::new(None));
        let remote = object.clone();
        let handled = std::thread::spawn(move || {
            let kind = crate::event::register_event_type(None).unwrap();
            send_event(remote.base.id(), &mut Event::new(kind))
        })
        .join()
        .unwrap();
        assert!(!handled);
        assert!(object.events.lock().is_empty());
    }

    #[test]
    fn test_cross_thread_parent_is_refused() {
        let parent = Arc::new(ObjectBase::new::<Named>());
        let parent_id = parent.id();
        let child = std::thread::spawn(move || {
            let child = ObjectBase::with_parent::<Named>(parent_id);
            (child.parent(), child.set_parent(Some(parent_id)))
        })
        .join()
        .unwrap();
        assert_eq!(child, (None, Err(ObjectError::CrossThreadParent)));
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_move_with_parent_is_refused() {
        let parent = ObjectBase::new::<Named>();
        let child = ObjectBase::with_parent::<Named>(parent.id());
        let target = ThreadData::unstarted("target");
        assert_eq!(child.move_to_thread(&target), Err(ObjectError::HasParent));
    }

    #[test]
    fn test_move_to_thread_moves_subtree_and_posted_events() {
        let root = Recorder::new(None);
        let child = Recorder::new(Some(root.base.id()));
        let kind = crate::event::register_event_type(None).unwrap();
        posted::post_event(child.base.id(), Event::new(kind), EventPriority::Normal);

        let target = ThreadData::unstarted("target");
        root.base.move_to_thread(&target).unwrap();

        assert_eq!(root.base.thread().serial(), target.serial());
        assert_eq!(child.base.thread().serial(), target.serial());
        assert!(root.events.lock().contains(&EventType::ThreadChange));
        assert!(child.events.lock().contains(&EventType::ThreadChange));
        assert_eq!(target.posted.lock().pending(), 1);
        assert_eq!(ThreadData::current().posted.lock().pending(), 0);

        // No longer ours: moving back from here is refused.
        assert_eq!(
            root.base.move_to_thread(&ThreadData::current()),
            Err(ObjectError::WrongThread("move_to_thread"))
        );
    }

    #[test]
    fn test_delete_later_runs_on_drain() {
        let object = ObjectBase::new::<Named>();
        object.delete_later();
        object.delete_later();
        assert!(object.is_alive());
        assert_eq!(object.core().posted_events(), 1);
        posted::send_posted_events(None, Some(EventType::DeferredDelete));
        assert!(!object.is_alive());
    }

    #[test]
    fn test_sender_is_scoped_to_invocation() {
        let sender_obj = ObjectBase::new::<Named>();
        let receiver = Arc::new(ObjectBase::new::<Named>());
        let seen = Arc::new(Mutex::new(None));
        let (r, s) = (receiver.clone(), seen.clone());
        let ping = NAMED_META.index_of_signal("ping").unwrap();
        connection::connect(
            sender_obj.id(),
            ping,
            receiver.id(),
            Slot::callable(move |_| *s.lock() = Some((r.sender(), r.sender_signal_index()))),
            crate::slot::ConnectionType::Direct,
        )
        .unwrap();
        sender_obj.emit(ping, ());
        assert_eq!(*seen.lock(), Some((Some(sender_obj.id()), Some(ping))));
        assert_eq!(receiver.sender(), None);
    }
}
