//! Readiness-loop dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
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

/// Dispatcher that drains posted events and then waits on a `mio` poller
/// for socket readiness, the nearest timer or a wake-up.
pub struct PollDispatcher {
    owner: Weak<ThreadData>,
    reactor: Reactor,
    timers: Mutex<TimerList>,
    interrupted: AtomicBool,
}

impl PollDispatcher {
    /// Create a dispatcher for `thread`.
    pub fn new(thread: &Arc<ThreadData>) -> Result<Self, DispatcherError> {
        Ok(Self {
            owner: Arc::downgrade(thread),
            reactor: Reactor::new()?,
            timers: Mutex::new(TimerList::new()),
            interrupted: AtomicBool::new(false),
        })
    }
}

impl EventDispatcher for PollDispatcher {
    #[tracing::instrument(skip_all, target = "horizon_lattice_kernel::dispatcher", level = "trace")]
    fn process_events(&self, flags: ProcessEventsFlags) -> bool {
        let Ok(data) = check_owner(&self.owner, "process_events") else {
            return false;
        };
        self.interrupted.store(false, Ordering::Release);
        self.reactor.clear_wake();

        let mut processed = posted::send_posted_events_in(&data, None, None);
        if self.interrupted.load(Ordering::Acquire) {
            return processed;
        }

        let can_wait = flags.contains(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS)
            && posted::can_wait(&data)
            && !self.interrupted.load(Ordering::Acquire);
        let timeout = if can_wait {
            self.timers.lock().time_until_next()
        } else {
            Some(Duration::ZERO)
        };
        tracing::trace!(target: targets::DISPATCHER, ?flags, ?timeout, "polling");

        if self.reactor.poll(timeout) {
            processed = true;
        }
        if !flags.contains(ProcessEventsFlags::EXCLUDE_SOCKET_NOTIFIERS) && self.reactor.activate_sockets() > 0 {
            processed = true;
        }
        if timer::activate_timers(&self.timers) > 0 {
            processed = true;
        }
        processed
    }

    fn register_timer(
        &self,
        id: TimerId,
        interval: Duration,
        timer_type: TimerType,
        object: ObjectId,
    ) -> Result<(), DispatcherError> {
        check_owner(&self.owner, "register_timer")?;
        self.timers.lock().register(id, interval, timer_type, object);
        tracing::trace!(target: targets::TIMER, ?id, ?interval, ?object, "timer registered");
        Ok(())
    }

    fn unregister_timer(&self, id: TimerId) -> bool {
        if check_owner(&self.owner, "unregister_timer").is_err() {
            return false;
        }
        self.timers.lock().unregister(id)
    }

    fn unregister_timers(&self, object: ObjectId) -> bool {
        if check_owner(&self.owner, "unregister_timers").is_err() {
            return false;
        }
        self.timers.lock().unregister_object(object)
    }

    fn registered_timers(&self, object: ObjectId) -> Vec<TimerInfo> {
        self.timers.lock().registered(object)
    }

    fn remaining_time(&self, id: TimerId) -> Option<Duration> {
        self.timers.lock().remaining_time(id)
    }

    fn register_socket_notifier(&self, fd: i32, kind: SocketKind, notifier: ObjectId) -> Result<(), DispatcherError> {
        check_owner(&self.owner, "register_socket_notifier")?;
        self.reactor.watch(fd, kind, notifier)
    }

    fn unregister_socket_notifier(&self, fd: i32, kind: SocketKind) -> bool {
        if check_owner(&self.owner, "unregister_socket_notifier").is_err() {
            return false;
        }
        self.reactor.unwatch(fd, kind)
    }

    fn wake_up(&self) {
        self.reactor.wake_up();
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        if let Some(data) = self.owner.upgrade() {
            posted::interrupt_wait(&data);
        }
        self.reactor.force_wake();
    }

    fn kind(&self) -> DispatcherKind {
        DispatcherKind::Poll
    }
}

impl std::fmt::Debug for PollDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollDispatcher")
            .field("timers", &self.timers.lock().len())
            .field("sockets", &self.reactor.watched())
            .finish()
    }
}

static_assertions::assert_impl_all!(PollDispatcher: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn on_fresh_thread(f: impl FnOnce(Arc<ThreadData>) + Send + 'static) {
        std::thread::spawn(move || f(ThreadData::current())).join().unwrap();
    }

    #[test]
    fn test_timer_registration_is_thread_bound() {
        let data = ThreadData::unstarted("elsewhere");
        let dispatcher = PollDispatcher::new(&data).unwrap();
        let result = dispatcher.register_timer(
            TimerId::allocate(),
            Duration::from_millis(5),
            TimerType::Precise,
            ObjectId::default(),
        );
        assert!(matches!(result, Err(DispatcherError::WrongThread("register_timer"))));
    }

    #[test]
    fn test_wait_returns_on_wake_up() {
        on_fresh_thread(|data| {
            let dispatcher = Arc::new(PollDispatcher::new(&data).unwrap());
            let remote = dispatcher.clone();
            let waker = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                remote.wake_up();
            });
            let start = Instant::now();
            assert!(dispatcher.process_events(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS));
            assert!(start.elapsed() < Duration::from_secs(5));
            waker.join().unwrap();
        });
    }

    #[test]
    fn test_interrupt_skips_the_wait() {
        on_fresh_thread(|data| {
            let dispatcher = PollDispatcher::new(&data).unwrap();
            dispatcher.interrupt();
            let start = Instant::now();
            dispatcher.process_events(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS);
            assert!(start.elapsed() < Duration::from_secs(1));
        });
    }

    #[test]
    fn test_remaining_time_for_registered_timer() {
        on_fresh_thread(|data| {
            let dispatcher = PollDispatcher::new(&data).unwrap();
            let id = TimerId::allocate();
            let object = ObjectId::default();
            dispatcher
                .register_timer(id, Duration::from_secs(30), TimerType::Coarse, object)
                .unwrap();
            assert!(dispatcher.remaining_time(id).unwrap() <= Duration::from_secs(30));
            assert_eq!(dispatcher.registered_timers(object).len(), 1);
            assert!(dispatcher.unregister_timers(object));
            assert_eq!(dispatcher.remaining_time(id), None);
        });
    }
}
