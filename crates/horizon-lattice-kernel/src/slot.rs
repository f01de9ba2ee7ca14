//! Call targets for connections and queued method invocation.
//!
//! A [`Slot`] is what a connection invokes: a method of the receiver
//! addressed by slot index, a free callable, or another signal of the
//! receiver that is re-emitted. Whether the call happens inline or is posted
//! to the receiver's thread is decided by the [`ConnectionType`].

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::connection;
use crate::error::ConnectError;
use crate::event::{Event, EventPriority};
use crate::logging::targets;
use crate::meta::{DELETE_LATER_SLOT, OBJECT_META};
use crate::metatype::Arguments;
use crate::object::{self, ObjectCore, ObjectId, SenderGuard};
use crate::posted;
use crate::thread::ThreadData;

/// How a connection delivers a signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Invoke the slot immediately in the emitting thread.
    Direct,
    /// Post the invocation to the receiver's thread.
    Queued,
    /// Direct if the receiver lives in the emitting thread, queued otherwise.
    ///
    /// The decision is made per emission, against the thread that emits.
    #[default]
    Auto,
    /// Queued, and the emitting thread blocks until the slot has run.
    ///
    /// Emitting through such a connection from the receiver's own thread
    /// would deadlock; the kernel warns and calls the slot directly instead.
    BlockingQueued,
}

impl ConnectionType {
    /// Whether arguments must be copied for another thread.
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued | Self::BlockingQueued)
    }
}

/// A free callable connected to a signal.
pub type SlotFn = dyn Fn(&Arguments) + Send + Sync;

/// The target of a connection.
#[derive(Clone)]
pub enum Slot {
    /// A method of the receiver, by absolute slot index.
    Method(usize),
    /// A free callable.
    Callable(Arc<SlotFn>),
    /// Re-emit a signal of the receiver, by absolute signal index.
    Signal(usize),
}

impl Slot {
    /// Wrap a closure.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&Arguments) + Send + Sync + 'static,
    {
        Self::Callable(Arc::new(f))
    }

    /// Whether two slots address the same target.
    ///
    /// Callables compare by identity.
    pub fn same_target(&self, other: &Slot) -> bool {
        match (self, other) {
            (Self::Method(a), Self::Method(b)) => a == b,
            (Self::Signal(a), Self::Signal(b)) => a == b,
            (Self::Callable(a), Self::Callable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Method(index) => write!(f, "Method({index})"),
            Self::Callable(_) => f.write_str("Callable"),
            Self::Signal(index) => write!(f, "Signal({index})"),
        }
    }
}

struct CompletionState {
    done: Mutex<bool>,
    condvar: Condvar,
}

/// Releases the waiter when dropped, whether or not the call ran.
pub(crate) struct CompletionHandle {
    inner: Arc<CompletionState>,
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.condvar.notify_all();
    }
}

/// Blocks until the matching [`CompletionHandle`] is gone.
pub(crate) struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    pub(crate) fn wait(self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.condvar.wait(&mut done);
        }
    }

    #[cfg(test)]
    fn wait_timeout(self, timeout: std::time::Duration) -> bool {
        let mut done = self.inner.done.lock();
        if !*done {
            self.inner.condvar.wait_for(&mut done, timeout);
        }
        *done
    }
}

pub(crate) fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        done: Mutex::new(false),
        condvar: Condvar::new(),
    });
    (
        CompletionHandle {
            inner: state.clone(),
        },
        CompletionWaiter { inner: state },
    )
}

/// A slot invocation travelling through a posted-event queue.
pub struct QueuedCall {
    sender: Option<(ObjectId, usize)>,
    slot: Slot,
    args: Arguments,
    completion: Option<CompletionHandle>,
}

impl QueuedCall {
    pub(crate) fn new(
        sender: Option<(ObjectId, usize)>,
        slot: Slot,
        args: Arguments,
        completion: Option<CompletionHandle>,
    ) -> Self {
        Self {
            sender,
            slot,
            args,
            completion,
        }
    }

    /// The slot to be invoked.
    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    /// The copied arguments.
    pub fn arguments(&self) -> &Arguments {
        &self.args
    }

    /// Run the call on `receiver` in the calling thread, then release any
    /// blocked emitter.
    pub(crate) fn execute(self, receiver: &Arc<ObjectCore>) {
        {
            let _sender = SenderGuard::new(receiver, self.sender);
            call_slot(receiver, &self.slot, &self.args);
        }
        drop(self.completion);
    }
}

impl fmt::Debug for QueuedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCall")
            .field("sender", &self.sender)
            .field("slot", &self.slot)
            .field("args", &self.args.len())
            .field("blocking", &self.completion.is_some())
            .finish()
    }
}

/// Invoke `slot` on `receiver` synchronously. Returns whether a target ran.
pub(crate) fn call_slot(receiver: &Arc<ObjectCore>, slot: &Slot, args: &Arguments) -> bool {
    match slot {
        Slot::Callable(f) => {
            f(args);
            true
        }
        Slot::Signal(index) => {
            connection::activate(receiver, *index, args);
            true
        }
        Slot::Method(index) if *index < OBJECT_META.slot_count() => {
            if *index == DELETE_LATER_SLOT {
                object::delete_later(receiver.id());
            }
            true
        }
        Slot::Method(index) => {
            let handled = object::instance(receiver.id()).is_some_and(|instance| instance.invoke_method(*index, args));
            if !handled {
                tracing::warn!(
                    target: targets::SIGNAL,
                    class = receiver.meta().class_name(),
                    index,
                    "slot was not handled by the receiver"
                );
            }
            handled
        }
    }
}

/// Post a queued call for `receiver`. The arguments are deep-copied first.
pub(crate) fn queue_call(
    receiver: &Arc<ObjectCore>,
    sender: Option<(ObjectId, usize)>,
    slot: Slot,
    args: &Arguments,
    completion: Option<CompletionHandle>,
) -> Result<(), ConnectError> {
    let args = args.deep_copy_for_queue().map_err(|type_name| {
        tracing::warn!(
            target: targets::SIGNAL,
            type_name,
            "cannot queue arguments of type '{type_name}' (make sure it is registered with register_meta_type)"
        );
        ConnectError::UnregisteredArgument(type_name.to_string())
    })?;
    let call = QueuedCall::new(sender, slot, args, completion);
    posted::post_event_to(receiver, Event::meta_call(call), EventPriority::Normal);
    Ok(())
}

/// Invoke slot `slot_index` of `object` with the given connection type.
///
/// Direct calls return whether the slot was handled. Queued calls return
/// `true` once posted; blocking-queued calls return after the slot has run.
/// A blocking-queued call to an object of the calling thread is refused
/// with a warning and returns `false`.
pub fn invoke_method(
    object: ObjectId,
    slot_index: usize,
    kind: ConnectionType,
    args: Arguments,
) -> Result<bool, ConnectError> {
    let Some(receiver) = object::core(object) else {
        tracing::warn!(target: targets::SIGNAL, ?object, "invoke_method: no such object");
        return Err(ConnectError::InvalidReceiver(object));
    };
    if slot_index >= receiver.meta().slot_count() {
        tracing::warn!(
            target: targets::SIGNAL,
            class = receiver.meta().class_name(),
            slot_index,
            "invoke_method: no such slot"
        );
        return Err(ConnectError::InvalidSlot {
            class: receiver.meta().class_name(),
            index: slot_index,
        });
    }

    let same_thread = receiver.thread().serial() == ThreadData::current().serial();
    let slot = Slot::Method(slot_index);
    match kind {
        ConnectionType::Direct => Ok(call_slot(&receiver, &slot, &args)),
        ConnectionType::Auto if same_thread => Ok(call_slot(&receiver, &slot, &args)),
        ConnectionType::Auto | ConnectionType::Queued => {
            queue_call(&receiver, None, slot, &args, None)?;
            Ok(true)
        }
        ConnectionType::BlockingQueued => {
            if same_thread {
                tracing::warn!(
                    target: targets::SIGNAL,
                    class = receiver.meta().class_name(),
                    slot_index,
                    "dead lock detected while calling a blocking-queued method on the current thread"
                );
                return Ok(false);
            }
            let (handle, waiter) = completion_pair();
            queue_call(&receiver, None, slot, &args, Some(handle))?;
            waiter.wait();
            Ok(true)
        }
    }
}

static_assertions::assert_impl_all!(Slot: Send, Sync);
static_assertions::assert_impl_all!(QueuedCall: Send);
