//! Error types for the Horizon Lattice kernel.
//!
//! Misuse of the object and event APIs (cross-thread parenting, connecting to
//! a destroyed object, re-entering a running loop, ...) is reported twice: a
//! `warn!` line on the diagnostic stream and an `Err` returned to the caller.
//! Nothing in the dispatch chain panics on misuse.

use thiserror::Error;

use crate::object::{ObjectError, ObjectId};
use crate::timer::TimerId;

/// The main error type for kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Object-related error.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),
    /// Connection-related error.
    #[error("connection error: {0}")]
    Connect(#[from] ConnectError),
    /// Event loop error.
    #[error("event loop error: {0}")]
    EventLoop(#[from] EventLoopError),
    /// Dispatcher error.
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherError),
    /// Application lifecycle error.
    #[error("application error: {0}")]
    Application(#[from] ApplicationError),
    /// Thread pool error.
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] ThreadPoolError),
}

/// Errors produced while establishing a connection or invoking a method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The sender no longer exists.
    #[error("sender {0:?} does not exist")]
    InvalidSender(ObjectId),
    /// The receiver no longer exists.
    #[error("receiver {0:?} does not exist")]
    InvalidReceiver(ObjectId),
    /// The signal index is out of range for the sender's class.
    #[error("no signal with index {index} on class {class}")]
    InvalidSignal {
        /// Class of the sender.
        class: &'static str,
        /// The rejected index.
        index: usize,
    },
    /// The slot index is out of range for the receiver's class.
    #[error("no slot with index {index} on class {class}")]
    InvalidSlot {
        /// Class of the receiver.
        class: &'static str,
        /// The rejected index.
        index: usize,
    },
    /// The slot takes arguments the signal does not provide.
    #[error("incompatible sender/receiver arguments: {signal} --> {slot}")]
    IncompatibleArguments {
        /// Signal signature.
        signal: String,
        /// Slot signature.
        slot: String,
    },
    /// A queued connection was requested for an argument type with no meta type.
    #[error("cannot queue arguments of type '{0}' (make sure it is registered with register_meta_type)")]
    UnregisteredArgument(String),
    /// A unique connection already exists for this signal and target.
    #[error("connection already exists")]
    Duplicate,
}

/// Errors produced by [`EventLoop`](crate::event_loop::EventLoop).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventLoopError {
    /// The loop was driven from a thread other than the one it belongs to.
    #[error("event loop can only be used from the thread that owns it")]
    WrongThread,
    /// The same loop instance is already running.
    #[error("event loop instance is already running")]
    AlreadyRunning,
    /// No dispatcher could be installed for the thread.
    #[error("cannot run an event loop without an event dispatcher")]
    NoDispatcher,
}

/// Errors produced by event dispatchers.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A timer or notifier was (un)registered from a thread that does not own it.
    #[error("{0} can only be used with threads started with EventThread or the main thread")]
    WrongThread(&'static str),
    /// The timer does not exist.
    #[error("invalid timer id {0:?}")]
    InvalidTimer(TimerId),
    /// A socket notifier is already registered for this descriptor and kind.
    #[error("socket notifier already registered for fd {0}")]
    NotifierExists(i32),
    /// The thread has no event dispatcher.
    #[error("no event dispatcher installed for this thread")]
    NoDispatcher,
    /// The underlying poller failed.
    #[error("poller error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by the [`Application`](crate::application::Application) singleton.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    /// An application instance already exists.
    #[error("there should be only one application object")]
    AlreadyExists,
    /// No application instance exists.
    #[error("application has not been created")]
    NotCreated,
    /// An operation that must run on the main thread was called elsewhere.
    #[error("{0} must be called from the main thread")]
    NotMainThread(&'static str),
    /// `exec` was called while a loop is already running on the main thread.
    #[error("the event loop is already running")]
    AlreadyRunning,
}

/// Thread pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThreadPoolError {
    /// The global pool was already initialized.
    #[error("global thread pool has already been initialized")]
    AlreadyInitialized,
    /// Building the pool failed.
    #[error("failed to create thread pool: {0}")]
    CreationFailed(String),
}

/// A specialized Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;
