//! Source-based dispatcher: a main context iterating prepare/check/dispatch
//! sources.
//!
//! Each iteration asks every source whether it is ready (`prepare`), polls
//! for at most the smallest timeout any source requested, asks the sources
//! that were not ready again (`check`) and dispatches the ready ones in
//! order. Posted events, timers and socket notifiers are built-in sources;
//! embedders add their own with [`SourceDispatcher::add_source`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use horizon_lattice_kernel::dispatcher::{EventSource, SourceDispatcher};
//! use horizon_lattice_kernel::thread::ThreadData;
//!
//! struct Heartbeat;
//!
//! impl EventSource for Heartbeat {
//!     fn prepare(&self) -> (bool, Option<Duration>) {
//!         (false, Some(Duration::from_secs(1)))
//!     }
//!     fn check(&self) -> bool {
//!         true
//!     }
//!     fn dispatch(&self) -> bool {
//!         println!("tick");
//!         true
//!     }
//! }
//!
//! let dispatcher = Arc::new(SourceDispatcher::new(&ThreadData::current()).unwrap());
//! dispatcher.add_source(Arc::new(Heartbeat));
//! ThreadData::current().set_dispatcher(Some(dispatcher));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::reactor::Reactor;
use super::{check_owner, DispatcherKind, EventDispatcher, ProcessEventsFlags, SocketKind};
use crate::error::DispatcherError;
use crate::logging::targets;
use crate::object::ObjectId;
use crate::posted;
use crate::thread::ThreadData;
use crate::timer::{self, TimerId, TimerInfo, TimerList, TimerType};

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A readiness source attached to a [`SourceDispatcher`].
pub trait EventSource: Send + Sync {
    /// Called before polling. Returns whether the source is ready now and,
    /// if not, how long the poll may block on its behalf (`None` for no limit).
    fn prepare(&self) -> (bool, Option<Duration>);

    /// Called after polling for sources that were not ready in `prepare`.
    fn check(&self) -> bool;

    /// Handle readiness. Returning `false` removes the source.
    fn dispatch(&self) -> bool;

    /// Whether nested iterations may dispatch this source while it is
    /// already dispatching.
    fn can_recurse(&self) -> bool {
        false
    }

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "source"
    }
}

/// Identifies a source added to a [`SourceDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

struct SourceEntry {
    id: SourceId,
    source: Arc<dyn EventSource>,
    dispatching: AtomicBool,
    removed: AtomicBool,
}

/// State shared between the dispatcher and its built-in sources.
struct Shared {
    owner: Weak<ThreadData>,
    reactor: Reactor,
    timers: Mutex<TimerList>,
    flags: AtomicU8,
    interrupted: AtomicBool,
}

impl Shared {
    fn flags(&self) -> ProcessEventsFlags {
        let bits = self.flags.load(Ordering::Acquire);
        [
            ProcessEventsFlags::EXCLUDE_SOCKET_NOTIFIERS,
            ProcessEventsFlags::WAIT_FOR_MORE_EVENTS,
            ProcessEventsFlags::EVENT_LOOP_EXEC,
        ]
        .into_iter()
        .filter(|flag| bits & flag.bits() != 0)
        .fold(ProcessEventsFlags::ALL_EVENTS, |acc, flag| acc | flag)
    }
}

struct PostedEventSource {
    shared: Arc<Shared>,
}

impl EventSource for PostedEventSource {
    fn prepare(&self) -> (bool, Option<Duration>) {
        let ready = self.shared.owner.upgrade().is_some_and(|data| !posted::can_wait(&data));
        (ready, None)
    }

    fn check(&self) -> bool {
        self.prepare().0
    }

    fn dispatch(&self) -> bool {
        if let Some(data) = self.shared.owner.upgrade() {
            posted::send_posted_events_in(&data, None, None);
        }
        true
    }

    fn can_recurse(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "posted events"
    }
}

struct TimerSource {
    shared: Arc<Shared>,
}

impl EventSource for TimerSource {
    fn prepare(&self) -> (bool, Option<Duration>) {
        match self.shared.timers.lock().time_until_next() {
            Some(remaining) if remaining.is_zero() => (true, None),
            other => (false, other),
        }
    }

    fn check(&self) -> bool {
        self.prepare().0
    }

    fn dispatch(&self) -> bool {
        timer::activate_timers(&self.shared.timers);
        true
    }

    fn can_recurse(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "timers"
    }
}

struct SocketSource {
    shared: Arc<Shared>,
}

impl SocketSource {
    fn ready(&self) -> bool {
        !self.shared.flags().contains(ProcessEventsFlags::EXCLUDE_SOCKET_NOTIFIERS) && self.shared.reactor.has_ready()
    }
}

impl EventSource for SocketSource {
    fn prepare(&self) -> (bool, Option<Duration>) {
        (self.ready(), None)
    }

    fn check(&self) -> bool {
        self.ready()
    }

    fn dispatch(&self) -> bool {
        self.shared.reactor.activate_sockets();
        true
    }

    fn can_recurse(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "socket notifiers"
    }
}

/// Dispatcher built from [`EventSource`]s.
pub struct SourceDispatcher {
    shared: Arc<Shared>,
    sources: Mutex<Vec<Arc<SourceEntry>>>,
}

impl SourceDispatcher {
    /// Create a dispatcher for `thread` with the built-in sources attached.
    pub fn new(thread: &Arc<ThreadData>) -> Result<Self, DispatcherError> {
        let shared = Arc::new(Shared {
            owner: Arc::downgrade(thread),
            reactor: Reactor::new()?,
            timers: Mutex::new(TimerList::new()),
            flags: AtomicU8::new(0),
            interrupted: AtomicBool::new(false),
        });
        let dispatcher = Self {
            shared: shared.clone(),
            sources: Mutex::new(Vec::new()),
        };
        dispatcher.add_source(Arc::new(PostedEventSource { shared: shared.clone() }));
        dispatcher.add_source(Arc::new(TimerSource { shared: shared.clone() }));
        dispatcher.add_source(Arc::new(SocketSource { shared }));
        Ok(dispatcher)
    }

    /// Attach `source`; it is consulted from the next iteration on.
    pub fn add_source(&self, source: Arc<dyn EventSource>) -> SourceId {
        let id = SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(target: targets::DISPATCHER, ?id, name = source.name(), "source attached");
        self.sources.lock().push(Arc::new(SourceEntry {
            id,
            source,
            dispatching: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        }));
        id
    }

    /// Detach a source. Returns `false` if it was not attached.
    pub fn remove_source(&self, id: SourceId) -> bool {
        let mut sources = self.sources.lock();
        let Some(index) = sources.iter().position(|entry| entry.id == id) else {
            return false;
        };
        sources.remove(index).removed.store(true, Ordering::Release);
        true
    }

    /// Number of attached sources, built-in ones included.
    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    fn eligible(&self) -> Vec<Arc<SourceEntry>> {
        self.sources
            .lock()
            .iter()
            .filter(|entry| !entry.dispatching.load(Ordering::Acquire) || entry.source.can_recurse())
            .cloned()
            .collect()
    }

    /// One main-context iteration. Returns whether any source was dispatched.
    fn iterate(&self, may_block: bool) -> bool {
        let candidates = self.eligible();
        let mut ready = vec![false; candidates.len()];
        let mut timeout: Option<Duration> = None;
        for (index, entry) in candidates.iter().enumerate() {
            let (is_ready, wanted) = entry.source.prepare();
            ready[index] = is_ready;
            if let Some(wanted) = wanted {
                timeout = Some(timeout.map_or(wanted, |current| current.min(wanted)));
            }
        }

        let any_ready = ready.iter().any(|r| *r);
        let block = may_block && !any_ready && !self.shared.interrupted.load(Ordering::Acquire);
        let poll_timeout = if block { timeout } else { Some(Duration::ZERO) };
        let woke = self.shared.reactor.poll(poll_timeout);

        for (index, entry) in candidates.iter().enumerate() {
            if !ready[index] {
                ready[index] = entry.source.check();
            }
        }

        let mut dispatched = woke;
        for (index, entry) in candidates.iter().enumerate() {
            if !ready[index] || entry.removed.load(Ordering::Acquire) {
                continue;
            }
            let was_dispatching = entry.dispatching.swap(true, Ordering::AcqRel);
            let keep = entry.source.dispatch();
            entry.dispatching.store(was_dispatching, Ordering::Release);
            dispatched = true;
            if !keep {
                tracing::trace!(target: targets::DISPATCHER, id = ?entry.id, name = entry.source.name(), "source finished");
                self.remove_source(entry.id);
            }
        }
        dispatched
    }
}

impl EventDispatcher for SourceDispatcher {
    #[tracing::instrument(skip_all, target = "horizon_lattice_kernel::dispatcher", level = "trace")]
    fn process_events(&self, flags: ProcessEventsFlags) -> bool {
        if check_owner(&self.shared.owner, "process_events").is_err() {
            return false;
        }
        self.shared.interrupted.store(false, Ordering::Release);
        self.shared.reactor.clear_wake();
        let previous = self.shared.flags.swap(flags.bits(), Ordering::AcqRel);
        let may_block = flags.contains(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS);
        let mut processed = self.iterate(may_block);
        while !processed && may_block && !self.shared.interrupted.load(Ordering::Acquire) {
            processed = self.iterate(true);
        }
        self.shared.flags.store(previous, Ordering::Release);
        processed
    }

    fn register_timer(
        &self,
        id: TimerId,
        interval: Duration,
        timer_type: TimerType,
        object: ObjectId,
    ) -> Result<(), DispatcherError> {
        check_owner(&self.shared.owner, "register_timer")?;
        self.shared.timers.lock().register(id, interval, timer_type, object);
        tracing::trace!(target: targets::TIMER, ?id, ?interval, ?object, "timer registered");
        Ok(())
    }

    fn unregister_timer(&self, id: TimerId) -> bool {
        if check_owner(&self.shared.owner, "unregister_timer").is_err() {
            return false;
        }
        self.shared.timers.lock().unregister(id)
    }

    fn unregister_timers(&self, object: ObjectId) -> bool {
        if check_owner(&self.shared.owner, "unregister_timers").is_err() {
            return false;
        }
        self.shared.timers.lock().unregister_object(object)
    }

    fn registered_timers(&self, object: ObjectId) -> Vec<TimerInfo> {
        self.shared.timers.lock().registered(object)
    }

    fn remaining_time(&self, id: TimerId) -> Option<Duration> {
        self.shared.timers.lock().remaining_time(id)
    }

    fn register_socket_notifier(&self, fd: i32, kind: SocketKind, notifier: ObjectId) -> Result<(), DispatcherError> {
        check_owner(&self.shared.owner, "register_socket_notifier")?;
        self.shared.reactor.watch(fd, kind, notifier)
    }

    fn unregister_socket_notifier(&self, fd: i32, kind: SocketKind) -> bool {
        if check_owner(&self.shared.owner, "unregister_socket_notifier").is_err() {
            return false;
        }
        self.shared.reactor.unwatch(fd, kind)
    }

    fn wake_up(&self) {
        self.shared.reactor.wake_up();
    }

    fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::Release);
        self.shared.reactor.force_wake();
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Source
    }
}

impl std::fmt::Debug for SourceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDispatcher")
            .field("sources", &self.source_count())
            .field("timers", &self.shared.timers.lock().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(SourceDispatcher: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Countdown {
        remaining: AtomicUsize,
        dispatched: Arc<AtomicUsize>,
    }

    impl EventSource for Countdown {
        fn prepare(&self) -> (bool, Option<Duration>) {
            (self.remaining.load(Ordering::SeqCst) > 0, None)
        }

        fn check(&self) -> bool {
            self.prepare().0
        }

        fn dispatch(&self) -> bool {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            self.remaining.fetch_sub(1, Ordering::SeqCst) > 1
        }
    }

    #[test]
    fn test_source_removed_when_dispatch_returns_false() {
        std::thread::spawn(|| {
            let dispatcher = SourceDispatcher::new(&ThreadData::current()).unwrap();
            let builtin = dispatcher.source_count();
            let dispatched = Arc::new(AtomicUsize::new(0));
            dispatcher.add_source(Arc::new(Countdown {
                remaining: AtomicUsize::new(3),
                dispatched: dispatched.clone(),
            }));
            assert_eq!(dispatcher.source_count(), builtin + 1);

            for _ in 0..3 {
                assert!(dispatcher.process_events(ProcessEventsFlags::ALL_EVENTS));
            }
            assert_eq!(dispatched.load(Ordering::SeqCst), 3);
            assert_eq!(dispatcher.source_count(), builtin);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_remove_source() {
        std::thread::spawn(|| {
            let dispatcher = SourceDispatcher::new(&ThreadData::current()).unwrap();
            let id = dispatcher.add_source(Arc::new(Countdown {
                remaining: AtomicUsize::new(0),
                dispatched: Arc::new(AtomicUsize::new(0)),
            }));
            assert!(dispatcher.remove_source(id));
            assert!(!dispatcher.remove_source(id));
        })
        .join()
        .unwrap();
    }

    struct Reentrant {
        dispatcher: Weak<SourceDispatcher>,
        depth: AtomicUsize,
        max_depth: AtomicUsize,
    }

    impl EventSource for Reentrant {
        fn prepare(&self) -> (bool, Option<Duration>) {
            (true, None)
        }

        fn check(&self) -> bool {
            true
        }

        fn dispatch(&self) -> bool {
            let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_depth.fetch_max(depth, Ordering::SeqCst);
            if depth == 1 {
                if let Some(dispatcher) = self.dispatcher.upgrade() {
                    dispatcher.iterate(false);
                }
            }
            self.depth.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn test_dispatching_source_is_not_reentered() {
        std::thread::spawn(|| {
            let dispatcher = Arc::new(SourceDispatcher::new(&ThreadData::current()).unwrap());
            let source = Arc::new(Reentrant {
                dispatcher: Arc::downgrade(&dispatcher),
                depth: AtomicUsize::new(0),
                max_depth: AtomicUsize::new(0),
            });
            dispatcher.add_source(source.clone());
            dispatcher.iterate(false);
            assert_eq!(source.max_depth.load(Ordering::SeqCst), 1);
        })
        .join()
        .unwrap();
    }
}
