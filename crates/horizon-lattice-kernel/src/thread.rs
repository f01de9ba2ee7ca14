//! Per-thread kernel state and threads that run their own event loop.
//!
//! Every OS thread that touches the kernel gets a [`ThreadData`]: its posted
//! event list, its event dispatcher, the stack of event loops currently
//! running on it and the loop nesting level. Objects record the `ThreadData`
//! they belong to; that is their thread affinity.
//!
//! [`EventThread`] starts a new OS thread that owns a `ThreadData`, installs a
//! dispatcher and runs an [`EventLoop`] until asked to quit:
//!
//! ```no_run
//! use horizon_lattice_kernel::thread::EventThread;
//!
//! let thread = EventThread::builder().name("io").spawn().unwrap();
//! // objects can now be moved to `thread.thread_data()`
//! thread.quit();
//! assert_eq!(thread.wait(), Some(0));
//! ```

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::bounded;
use parking_lot::{Mutex, RwLock};

use crate::dispatcher::{self, DispatcherKind, EventDispatcher};
use crate::error::{DispatcherError, KernelError, Result};
use crate::event::EventType;
use crate::event_loop::{EventLoop, LoopState};
use crate::logging::targets;
use crate::posted::PostEventList;

static NEXT_THREAD_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Thread data of the application's main thread, once an application exists.
static MAIN_THREAD: RwLock<Option<Arc<ThreadData>>> = RwLock::new(None);

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadData>>> = const { RefCell::new(None) };
}

/// Kernel state owned by one OS thread.
pub struct ThreadData {
    serial: u64,
    name: Mutex<String>,
    thread_id: OnceLock<ThreadId>,
    pub(crate) posted: Mutex<PostEventList>,
    loop_level: AtomicU32,
    pub(crate) loops: Mutex<Vec<Arc<LoopState>>>,
    quit_now: AtomicBool,
    exit_code: AtomicI32,
    finished: AtomicBool,
    dispatcher: RwLock<Option<Arc<dyn EventDispatcher>>>,
}

impl ThreadData {
    fn new(name: String) -> Self {
        Self {
            serial: NEXT_THREAD_SERIAL.fetch_add(1, Ordering::Relaxed),
            name: Mutex::new(name),
            thread_id: OnceLock::new(),
            posted: Mutex::new(PostEventList::default()),
            loop_level: AtomicU32::new(0),
            loops: Mutex::new(Vec::new()),
            quit_now: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            finished: AtomicBool::new(false),
            dispatcher: RwLock::new(None),
        }
    }

    /// Thread data of the calling thread, created on first use.
    pub fn current() -> Arc<ThreadData> {
        CURRENT
            .try_with(|current| {
                current
                    .borrow_mut()
                    .get_or_insert_with(|| {
                        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
                        let data = Arc::new(ThreadData::new(name));
                        let _ = data.thread_id.set(thread::current().id());
                        tracing::trace!(target: targets::THREAD, serial = data.serial, "adopted thread");
                        data
                    })
                    .clone()
            })
            // Thread-local storage is being torn down; hand out a detached record.
            .unwrap_or_else(|_| Arc::new(ThreadData::new(String::from("<exiting>"))))
    }

    /// Bind `data` to the calling thread. Used by threads spawned by the kernel.
    fn adopt(data: Arc<ThreadData>) {
        let _ = data.thread_id.set(thread::current().id());
        CURRENT.with(|current| *current.borrow_mut() = Some(data));
    }

    /// Create thread data for a thread that has not started yet.
    pub(crate) fn unstarted(name: &str) -> Arc<ThreadData> {
        Arc::new(ThreadData::new(name.to_string()))
    }

    /// Unique serial number of this record.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The thread's name.
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// The OS thread id, once the thread has started.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    /// Whether the calling thread is this thread.
    pub fn is_current(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    /// Whether this is the application's main thread.
    pub fn is_main(&self) -> bool {
        MAIN_THREAD
            .read()
            .as_ref()
            .is_some_and(|main| std::ptr::eq(main.as_ref(), self))
    }

    /// Whether the thread has finished running its event loop.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Current loop nesting level (running loops plus in-progress deliveries).
    pub fn loop_level(&self) -> u32 {
        self.loop_level.load(Ordering::Acquire)
    }

    pub(crate) fn enter_level(self: &Arc<Self>) -> LoopLevelGuard {
        self.loop_level.fetch_add(1, Ordering::AcqRel);
        LoopLevelGuard { data: self.clone() }
    }

    /// Number of event loops currently running on this thread.
    pub fn running_loops(&self) -> usize {
        self.loops.lock().len()
    }

    pub(crate) fn quit_now(&self) -> bool {
        self.quit_now.load(Ordering::Acquire)
    }

    pub(crate) fn set_quit_now(&self, quit: bool) {
        self.quit_now.store(quit, Ordering::Release);
    }

    /// The installed event dispatcher.
    pub fn dispatcher(&self) -> Option<Arc<dyn EventDispatcher>> {
        self.dispatcher.read().clone()
    }

    /// Install (or remove) the thread's event dispatcher.
    pub fn set_dispatcher(&self, dispatcher: Option<Arc<dyn EventDispatcher>>) {
        *self.dispatcher.write() = dispatcher;
    }

    /// The installed dispatcher, creating one of `kind` if there is none.
    pub fn ensure_dispatcher(self: &Arc<Self>, kind: DispatcherKind) -> Result<Arc<dyn EventDispatcher>> {
        if let Some(existing) = self.dispatcher() {
            return Ok(existing);
        }
        let mut slot = self.dispatcher.write();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let created = dispatcher::create(kind, self).map_err(KernelError::from)?;
        tracing::debug!(target: targets::THREAD, serial = self.serial, ?kind, "created event dispatcher");
        *slot = Some(created.clone());
        Ok(created)
    }

    /// Wake the dispatcher if one is installed.
    pub fn wake_up(&self) {
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.wake_up();
        }
    }

    /// Ask every event loop running on this thread to exit with `code`.
    ///
    /// Loops started afterwards return immediately until the thread is
    /// restarted.
    pub fn exit_loops(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
        self.set_quit_now(true);
        self.exit_running_loops(code);
    }

    /// Ask the loops currently running on this thread to exit with `code`.
    /// Loops started afterwards run normally.
    pub(crate) fn exit_running_loops(&self, code: i32) {
        for state in self.loops.lock().iter() {
            state.request_exit(code);
        }
        if let Some(dispatcher) = self.dispatcher() {
            dispatcher.interrupt();
        }
    }
}

impl std::fmt::Debug for ThreadData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadData")
            .field("serial", &self.serial)
            .field("name", &*self.name.lock())
            .field("loop_level", &self.loop_level())
            .finish()
    }
}

/// Keeps the loop level raised while alive.
pub(crate) struct LoopLevelGuard {
    data: Arc<ThreadData>,
}

impl Drop for LoopLevelGuard {
    fn drop(&mut self) {
        self.data.loop_level.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Record the calling thread as the application's main thread.
pub(crate) fn set_main_thread(data: Option<Arc<ThreadData>>) {
    *MAIN_THREAD.write() = data;
}

/// Thread data of the main thread, if an application has been created.
pub fn main_thread() -> Option<Arc<ThreadData>> {
    MAIN_THREAD.read().clone()
}

/// Check if the current thread is the application's main thread.
///
/// Returns `false` when no application exists.
pub fn is_main_thread() -> bool {
    main_thread().is_some_and(|main| main.is_current())
}

/// Configuration for an [`EventThread`].
#[derive(Debug, Clone)]
pub struct EventThreadConfig {
    /// Name for the OS thread.
    pub name: String,
    /// Stack size in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
    /// Dispatcher installed on the new thread.
    pub dispatcher: DispatcherKind,
}

impl Default for EventThreadConfig {
    fn default() -> Self {
        Self {
            name: "horizon-event-thread".to_string(),
            stack_size: None,
            dispatcher: DispatcherKind::default(),
        }
    }
}

/// Builder for [`EventThread`]s.
#[derive(Debug, Default)]
pub struct EventThreadBuilder {
    config: EventThreadConfig,
}

impl EventThreadBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Choose the dispatcher backend.
    pub fn dispatcher(mut self, kind: DispatcherKind) -> Self {
        self.config.dispatcher = kind;
        self
    }

    /// Start the thread.
    pub fn spawn(self) -> Result<EventThread> {
        EventThread::with_config(self.config)
    }
}

/// An OS thread running its own event loop.
pub struct EventThread {
    data: Arc<ThreadData>,
    handle: Mutex<Option<JoinHandle<i32>>>,
}

impl EventThread {
    /// A builder for configuring the thread.
    pub fn builder() -> EventThreadBuilder {
        EventThreadBuilder::new()
    }

    /// Start a thread with default configuration.
    pub fn spawn() -> Result<Self> {
        Self::with_config(EventThreadConfig::default())
    }

    /// Start a thread with `config`.
    ///
    /// Returns once the thread has installed its dispatcher, so events
    /// posted to it from then on wake it up.
    pub fn with_config(config: EventThreadConfig) -> Result<Self> {
        let data = ThreadData::unstarted(&config.name);
        let (started_tx, started_rx) = bounded::<std::result::Result<(), String>>(1);

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread_data = data.clone();
        let kind = config.dispatcher;
        let handle = builder
            .spawn(move || {
                ThreadData::adopt(thread_data.clone());
                if let Err(err) = thread_data.ensure_dispatcher(kind) {
                    let _ = started_tx.send(Err(err.to_string()));
                    return -1;
                }
                let _ = started_tx.send(Ok(()));
                tracing::debug!(target: targets::THREAD, name = %thread_data.name(), "event thread started");

                let code = EventLoop::new().exec().unwrap_or(-1);
                // An exit requested before the loop started still reports its code.
                let code = if thread_data.quit_now() {
                    thread_data.exit_code.load(Ordering::Acquire)
                } else {
                    code
                };

                crate::posted::send_posted_events_in(&thread_data, None, Some(EventType::DeferredDelete));
                thread_data.finished.store(true, Ordering::Release);
                thread_data.set_dispatcher(None);
                tracing::debug!(target: targets::THREAD, name = %thread_data.name(), code, "event thread finished");
                code
            })
            .map_err(DispatcherError::Io)?;

        match started_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                let _ = handle.join();
                return Err(DispatcherError::Io(std::io::Error::other(message)).into());
            }
            Err(_) => {
                let _ = handle.join();
                return Err(DispatcherError::NoDispatcher.into());
            }
        }

        Ok(Self {
            data,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The thread's kernel state; the target for moving objects to this thread.
    pub fn thread_data(&self) -> &Arc<ThreadData> {
        &self.data
    }

    /// Whether the thread is still running its loop.
    pub fn is_running(&self) -> bool {
        !self.data.is_finished()
    }

    /// Ask the thread's event loops to exit with `code`.
    pub fn exit(&self, code: i32) {
        self.data.exit_loops(code);
    }

    /// Ask the thread's event loops to exit with code 0.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Join the thread and return its exit code.
    ///
    /// Returns `None` if already joined or the thread panicked.
    pub fn wait(&self) -> Option<i32> {
        let handle = self.handle.lock().take()?;
        handle.join().ok()
    }
}

impl Drop for EventThread {
    fn drop(&mut self) {
        if self.handle.lock().is_some() {
            self.quit();
            let _ = self.wait();
        }
    }
}

static_assertions::assert_impl_all!(ThreadData: Send, Sync);
static_assertions::assert_impl_all!(EventThread: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = ThreadData::current();
        let b = ThreadData::current();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_current());

        let other = thread::spawn(ThreadData::current).join().unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert!(!other.is_current());
    }

    #[test]
    fn test_loop_level_guard() {
        let data = ThreadData::current();
        let before = data.loop_level();
        {
            let _outer = data.enter_level();
            let _inner = data.enter_level();
            assert_eq!(data.loop_level(), before + 2);
        }
        assert_eq!(data.loop_level(), before);
    }

    #[test]
    fn test_unstarted_thread_is_not_current() {
        let data = ThreadData::unstarted("later");
        assert!(!data.is_current());
        assert_eq!(data.thread_id(), None);
        assert_eq!(data.name(), "later");
    }

    #[test]
    fn test_event_thread_quit_and_wait() {
        let thread = EventThread::builder().name("quit-test").spawn().unwrap();
        assert!(thread.thread_data().dispatcher().is_some());
        thread.exit(7);
        assert_eq!(thread.wait(), Some(7));
        assert!(!thread.is_running());
        assert_eq!(thread.wait(), None);
    }

    #[test]
    fn test_event_thread_quit_before_loop_starts() {
        let thread = EventThread::spawn().unwrap();
        thread.quit();
        assert_eq!(thread.wait(), Some(0));
    }
}
