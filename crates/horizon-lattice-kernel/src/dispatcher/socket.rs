//! Socket notifiers: objects that signal readiness of a file descriptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DispatcherError, Result};
use crate::event::{Event, EventType};
use crate::logging::targets;
use crate::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
use crate::metatype::Arguments;
use crate::object::{self, Object, ObjectBase, ObjectId};
use crate::slot::{self, Slot};
use crate::thread::ThreadData;

/// The readiness a notifier watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// Data can be read.
    Read,
    /// Data can be written.
    Write,
    /// An exceptional condition, such as out-of-band data.
    Exception,
}

/// Meta descriptor of [`SocketNotifier`]: adds `activated(i32)`.
pub static SOCKET_NOTIFIER_META: MetaDescriptor = MetaDescriptor::new("SocketNotifier", Some(&OBJECT_META))
    .with_signals(&[MethodMeta::new("activated", &["i32"])]);

/// Watches a raw file descriptor and emits `activated(fd)` on readiness.
///
/// The notifier registers with the dispatcher of its thread while enabled.
/// Notifiers fire level-triggered: as long as the descriptor stays ready,
/// every dispatcher pass emits `activated` again.
pub struct SocketNotifier {
    base: ObjectBase,
    fd: i32,
    kind: SocketKind,
    enabled: AtomicBool,
}

impl SocketNotifier {
    /// Create an enabled notifier for `fd` on the calling thread.
    pub fn new(fd: i32, kind: SocketKind, parent: Option<ObjectId>) -> Result<Arc<Self>> {
        let notifier = object::register(Self {
            base: ObjectBase::with_meta(&SOCKET_NOTIFIER_META, std::any::type_name::<Self>(), parent),
            fd,
            kind,
            enabled: AtomicBool::new(false),
        });
        notifier.set_enabled(true)?;
        Ok(notifier)
    }

    /// Absolute index of the `activated(i32)` signal.
    pub fn activated_signal() -> usize {
        SOCKET_NOTIFIER_META.signal_offset()
    }

    /// The watched descriptor.
    pub fn socket(&self) -> i32 {
        self.fd
    }

    /// The watched readiness.
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// The notifier's object base.
    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    /// Whether the notifier is registered with its dispatcher.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Register with or unregister from the thread's dispatcher.
    ///
    /// Must be called from the notifier's thread.
    pub fn set_enabled(&self, enable: bool) -> Result<()> {
        if self.enabled.load(Ordering::Acquire) == enable {
            return Ok(());
        }
        let data = self.base.thread();
        if !data.is_current() {
            tracing::warn!(target: targets::DISPATCHER, fd = self.fd, "socket notifiers cannot be enabled or disabled from another thread");
            return Err(DispatcherError::WrongThread("set_enabled").into());
        }
        let Some(dispatcher) = data.dispatcher() else {
            tracing::warn!(target: targets::DISPATCHER, fd = self.fd, "socket notifiers can only be used with threads that have an event dispatcher");
            return Err(DispatcherError::NoDispatcher.into());
        };
        if enable {
            dispatcher.register_socket_notifier(self.fd, self.kind, self.base.id())?;
        } else {
            dispatcher.unregister_socket_notifier(self.fd, self.kind);
        }
        self.enabled.store(enable, Ordering::Release);
        Ok(())
    }

    /// Unregister here and queue the registration on whichever thread the
    /// notifier lives in when the queued call runs.
    fn carry_registration(&self) {
        let data = self.base.thread();
        if let Some(dispatcher) = data.dispatcher() {
            dispatcher.unregister_socket_notifier(self.fd, self.kind);
        }
        let (id, fd, kind) = (self.base.id(), self.fd, self.kind);
        let reregister = Slot::callable(move |_| {
            let Some(dispatcher) = ThreadData::current().dispatcher() else {
                tracing::warn!(target: targets::DISPATCHER, fd, "socket notifier moved to a thread without an event dispatcher");
                return;
            };
            if let Err(err) = dispatcher.register_socket_notifier(fd, kind, id) {
                tracing::warn!(target: targets::DISPATCHER, fd, %err, "could not re-register socket notifier");
            }
        });
        if let Err(err) = slot::queue_call(self.base.core(), None, reregister, &Arguments::new(), None) {
            tracing::warn!(target: targets::DISPATCHER, fd, %err, "could not carry socket notifier to the new thread");
        }
    }
}

impl Object for SocketNotifier {
    fn object_id(&self) -> ObjectId {
        self.base.id()
    }

    fn static_meta() -> &'static MetaDescriptor {
        &SOCKET_NOTIFIER_META
    }

    fn event(&self, event: &mut Event) -> bool {
        match event.event_type() {
            EventType::SocketActivate => {
                if self.is_enabled() {
                    if let Some(fd) = event.socket() {
                        self.base.emit(Self::activated_signal(), (fd,));
                    }
                }
                true
            }
            EventType::ThreadChange => {
                if self.is_enabled() {
                    self.carry_registration();
                }
                // Timers still move with the object.
                false
            }
            _ => false,
        }
    }
}

impl Drop for SocketNotifier {
    fn drop(&mut self) {
        if self.is_enabled() && self.base.thread().is_current() {
            let _ = self.set_enabled(false);
        }
    }
}

impl std::fmt::Debug for SocketNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketNotifier")
            .field("id", &self.base.id())
            .field("fd", &self.fd)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
