//! Event loops.
//!
//! An [`EventLoop`] repeatedly asks its thread's dispatcher to process
//! events until told to exit. Loops nest: starting a new loop from inside an
//! event handler (a modal operation) pushes it on the thread's loop stack,
//! and the outer loop resumes once it returns. Each running loop keeps a
//! [`LoopState`] on that stack so exit requests can reach it from other
//! threads.
//!
//! ```no_run
//! use horizon_lattice_kernel::event_loop::EventLoop;
//!
//! let event_loop = EventLoop::new();
//! // ...post events, start timers, connect signals...
//! let code = event_loop.exec().unwrap();
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatcher::{DispatcherKind, ProcessEventsFlags};
use crate::error::EventLoopError;
use crate::logging::targets;
use crate::thread::ThreadData;

/// Exit bookkeeping of one loop instance.
#[derive(Debug, Default)]
pub struct LoopState {
    exit: AtomicBool,
    return_code: AtomicI32,
    in_exec: AtomicBool,
}

impl LoopState {
    pub(crate) fn request_exit(&self, code: i32) {
        self.return_code.store(code, Ordering::Release);
        self.exit.store(true, Ordering::Release);
    }

    fn should_exit(&self) -> bool {
        self.exit.load(Ordering::Acquire)
    }
}

/// Pops the loop from the thread's stack when `exec` returns.
struct LoopReference<'a> {
    thread: &'a ThreadData,
    state: &'a Arc<LoopState>,
}

impl Drop for LoopReference<'_> {
    fn drop(&mut self) {
        let mut loops = self.thread.loops.lock();
        if let Some(index) = loops.iter().rposition(|s| Arc::ptr_eq(s, self.state)) {
            loops.remove(index);
        }
        drop(loops);
        self.state.in_exec.store(false, Ordering::Release);
    }
}

/// A loop processing the events of the thread that created it.
pub struct EventLoop {
    thread: Arc<ThreadData>,
    state: Arc<LoopState>,
}

impl EventLoop {
    /// Create a loop for the calling thread.
    pub fn new() -> Self {
        Self {
            thread: ThreadData::current(),
            state: Arc::new(LoopState::default()),
        }
    }

    /// The thread the loop belongs to.
    pub fn thread(&self) -> &Arc<ThreadData> {
        &self.thread
    }

    /// Run until [`exit`](Self::exit) is called and return its code.
    pub fn exec(&self) -> Result<i32, EventLoopError> {
        self.exec_with(ProcessEventsFlags::ALL_EVENTS)
    }

    /// Run with extra `flags` (for example `EXCLUDE_SOCKET_NOTIFIERS`).
    ///
    /// Returns `-1` immediately if the thread has been told to quit. Fails
    /// when called from another thread or when this instance is already
    /// running; nested loops need their own instance.
    pub fn exec_with(&self, flags: ProcessEventsFlags) -> Result<i32, EventLoopError> {
        if !self.thread.is_current() {
            tracing::warn!(target: targets::EVENT_LOOP, "cannot exec an event loop owned by another thread");
            return Err(EventLoopError::WrongThread);
        }
        if self.state.in_exec.load(Ordering::Acquire) {
            tracing::warn!(target: targets::EVENT_LOOP, "event loop instance is already running");
            return Err(EventLoopError::AlreadyRunning);
        }
        self.state.exit.store(false, Ordering::Release);
        self.state.in_exec.store(true, Ordering::Release);
        if self.thread.quit_now() {
            self.state.in_exec.store(false, Ordering::Release);
            return Ok(-1);
        }
        let dispatcher = match self.thread.ensure_dispatcher(DispatcherKind::default()) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                tracing::warn!(target: targets::EVENT_LOOP, %err, "no event dispatcher for event loop");
                self.state.in_exec.store(false, Ordering::Release);
                return Err(EventLoopError::NoDispatcher);
            }
        };

        self.thread.loops.lock().push(self.state.clone());
        let _reference = LoopReference {
            thread: &self.thread,
            state: &self.state,
        };
        let _level = self.thread.enter_level();
        tracing::debug!(
            target: targets::EVENT_LOOP,
            thread = self.thread.serial(),
            depth = self.thread.running_loops(),
            "event loop started"
        );

        let flags = flags | ProcessEventsFlags::WAIT_FOR_MORE_EVENTS | ProcessEventsFlags::EVENT_LOOP_EXEC;
        while !self.state.should_exit() {
            dispatcher.process_events(flags);
        }

        let code = self.state.return_code.load(Ordering::Acquire);
        tracing::debug!(target: targets::EVENT_LOOP, thread = self.thread.serial(), code, "event loop exited");
        Ok(code)
    }

    /// Run one dispatcher pass. Returns whether anything was processed.
    #[tracing::instrument(skip_all, target = "horizon_lattice_kernel::event_loop", level = "trace")]
    pub fn process_events(&self, flags: ProcessEventsFlags) -> bool {
        if !self.thread.is_current() {
            tracing::warn!(target: targets::EVENT_LOOP, "cannot process events of another thread");
            return false;
        }
        match self.thread.dispatcher() {
            Some(dispatcher) => dispatcher.process_events(flags),
            None => false,
        }
    }

    /// Process pending events for at most `max_time`, without waiting.
    ///
    /// Stops early once a pass finds nothing to do.
    pub fn process_events_for(&self, flags: ProcessEventsFlags, max_time: Duration) {
        let deadline = Instant::now() + max_time;
        let flags = flags.without(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS);
        while self.process_events(flags) {
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    /// Make `exec` return `code`. Safe to call from any thread.
    pub fn exit(&self, code: i32) {
        self.state.request_exit(code);
        if let Some(dispatcher) = self.thread.dispatcher() {
            dispatcher.interrupt();
        }
    }

    /// Make `exec` return 0.
    pub fn quit(&self) {
        self.exit(0);
    }

    /// Whether `exec` is running.
    pub fn is_running(&self) -> bool {
        self.state.in_exec.load(Ordering::Acquire)
    }

    /// Wake the thread's dispatcher.
    pub fn wake_up(&self) {
        self.thread.wake_up();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("thread", &self.thread.serial())
            .field("running", &self.is_running())
            .finish()
    }
}

static_assertions::assert_impl_all!(EventLoop: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventPriority, EventType};
    use crate::object::{self, Object, ObjectBase, ObjectId};
    use crate::posted;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    type Hook = Box<dyn Fn(&Probe) + Send + Sync>;

    struct Probe {
        base: ObjectBase,
        seen: AtomicUsize,
        hook: Hook,
    }

    impl Object for Probe {
        fn object_id(&self) -> ObjectId {
            self.base.id()
        }

        fn custom_event(&self, _event: &mut Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
            (self.hook)(self);
        }
    }

    fn probe(hook: impl Fn(&Probe) + Send + Sync + 'static) -> Arc<Probe> {
        object::register(Probe {
            base: ObjectBase::new::<Probe>(),
            seen: AtomicUsize::new(0),
            hook: Box::new(hook),
        })
    }

    #[test]
    fn test_exit_from_handler_returns_code() {
        thread::spawn(|| {
            let event_loop = Arc::new(EventLoop::new());
            let handle = event_loop.clone();
            let target = probe(move |_| handle.exit(3));
            posted::post_event(target.base.id(), Event::new(EventType::User(1)), EventPriority::Normal);
            assert_eq!(event_loop.exec(), Ok(3));
            assert!(!event_loop.is_running());
            assert_eq!(target.seen.load(Ordering::SeqCst), 1);
            assert_eq!(ThreadData::current().running_loops(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_same_instance_cannot_reenter() {
        thread::spawn(|| {
            let event_loop = Arc::new(EventLoop::new());
            let handle = event_loop.clone();
            let nested = Arc::new(parking_lot::Mutex::new(None));
            let result = nested.clone();
            let target = probe(move |_| {
                *result.lock() = Some(handle.exec());
                handle.quit();
            });
            posted::post_event(target.base.id(), Event::new(EventType::User(1)), EventPriority::Normal);
            assert_eq!(event_loop.exec(), Ok(0));
            assert_eq!(*nested.lock(), Some(Err(EventLoopError::AlreadyRunning)));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_nested_loop_runs_and_unwinds() {
        thread::spawn(|| {
            let outer = Arc::new(EventLoop::new());
            let outer_handle = outer.clone();
            let depth = Arc::new(AtomicUsize::new(0));
            let max_depth = depth.clone();
            let target = probe(move |probe| {
                if probe.seen.load(Ordering::SeqCst) == 1 {
                    let inner = Arc::new(EventLoop::new());
                    let inner_handle = inner.clone();
                    let nested_target = self::probe(move |_| inner_handle.exit(9));
                    posted::post_event(nested_target.base.id(), Event::new(EventType::User(2)), EventPriority::Normal);
                    max_depth.store(ThreadData::current().running_loops() + 1, Ordering::SeqCst);
                    assert_eq!(inner.exec(), Ok(9));
                    outer_handle.quit();
                }
            });
            posted::post_event(target.base.id(), Event::new(EventType::User(1)), EventPriority::Normal);
            assert_eq!(outer.exec(), Ok(0));
            assert_eq!(depth.load(Ordering::SeqCst), 2);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_exec_from_other_thread_fails() {
        let event_loop = Arc::new(EventLoop::new());
        let remote = event_loop.clone();
        let result = thread::spawn(move || remote.exec()).join().unwrap();
        assert_eq!(result, Err(EventLoopError::WrongThread));
    }

    #[test]
    fn test_exit_from_other_thread_wakes_loop() {
        thread::spawn(|| {
            let event_loop = Arc::new(EventLoop::new());
            let remote = event_loop.clone();
            let stopper = thread::spawn(move || {
                while !remote.is_running() {
                    thread::sleep(Duration::from_millis(1));
                }
                remote.exit(4);
            });
            assert_eq!(event_loop.exec(), Ok(4));
            stopper.join().unwrap();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_process_events_for_drains_queue() {
        thread::spawn(|| {
            let data = ThreadData::current();
            data.ensure_dispatcher(DispatcherKind::Poll).unwrap();
            let target = probe(|_| {});
            for _ in 0..3 {
                posted::post_event(target.base.id(), Event::new(EventType::User(1)), EventPriority::Normal);
            }
            EventLoop::new().process_events_for(ProcessEventsFlags::ALL_EVENTS, Duration::from_millis(50));
            assert_eq!(target.seen.load(Ordering::SeqCst), 3);
        })
        .join()
        .unwrap();
    }
}
