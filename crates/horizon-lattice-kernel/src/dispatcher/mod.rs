//! Event dispatchers: the per-thread backends that wait for readiness and
//! drain the posted-event queue.
//!
//! A dispatcher owns the thread's timers and socket notifiers and a wake-up
//! primitive other threads use after posting. Two backends are provided:
//!
//! - [`PollDispatcher`] - a readiness loop over a `mio` poller.
//! - [`SourceDispatcher`] - a main context built from prepare/check/dispatch
//!   [`EventSource`]s, to which embedders may add their own sources.
//!
//! Dispatchers are created on demand by
//! [`ThreadData::ensure_dispatcher`](crate::thread::ThreadData::ensure_dispatcher)
//! and driven by [`EventLoop`](crate::event_loop::EventLoop).

mod poll;
mod reactor;
mod socket;
mod source;

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

pub use poll::PollDispatcher;
pub use socket::{SocketKind, SocketNotifier, SOCKET_NOTIFIER_META};
pub use source::{EventSource, SourceDispatcher, SourceId};

use crate::error::DispatcherError;
use crate::object::ObjectId;
use crate::thread::ThreadData;
use crate::timer::{TimerId, TimerInfo, TimerType};

/// Controls what one pass of [`EventDispatcher::process_events`] does.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProcessEventsFlags(u8);

impl ProcessEventsFlags {
    /// Process every kind of event.
    pub const ALL_EVENTS: Self = Self(0);
    /// Leave socket readiness for a later pass.
    pub const EXCLUDE_SOCKET_NOTIFIERS: Self = Self(1 << 0);
    /// Block until something happens if nothing is ready.
    pub const WAIT_FOR_MORE_EVENTS: Self = Self(1 << 1);
    /// Set by [`EventLoop::exec`](crate::event_loop::EventLoop::exec).
    pub const EVENT_LOOP_EXEC: Self = Self(1 << 2);

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The flags without those in `other`.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ProcessEventsFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ProcessEventsFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ProcessEventsFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::EXCLUDE_SOCKET_NOTIFIERS) {
            names.push("EXCLUDE_SOCKET_NOTIFIERS");
        }
        if self.contains(Self::WAIT_FOR_MORE_EVENTS) {
            names.push("WAIT_FOR_MORE_EVENTS");
        }
        if self.contains(Self::EVENT_LOOP_EXEC) {
            names.push("EVENT_LOOP_EXEC");
        }
        if names.is_empty() {
            f.write_str("ALL_EVENTS")
        } else {
            f.write_str(&names.join(" | "))
        }
    }
}

/// Which backend [`create`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DispatcherKind {
    /// [`PollDispatcher`].
    #[default]
    Poll,
    /// [`SourceDispatcher`].
    Source,
}

/// Backend interface driven by event loops.
///
/// Timer and socket registration must happen on the dispatcher's own
/// thread; calls from other threads are rejected with
/// [`DispatcherError::WrongThread`]. [`wake_up`](Self::wake_up) and
/// [`interrupt`](Self::interrupt) may be called from anywhere.
pub trait EventDispatcher: Send + Sync {
    /// Run one pass: posted events, socket readiness and expired timers.
    ///
    /// Blocks only if `flags` contains `WAIT_FOR_MORE_EVENTS` and nothing is
    /// ready. Returns whether anything was processed.
    fn process_events(&self, flags: ProcessEventsFlags) -> bool;

    /// Register a repeating timer for `object`.
    fn register_timer(
        &self,
        id: TimerId,
        interval: Duration,
        timer_type: TimerType,
        object: ObjectId,
    ) -> Result<(), DispatcherError>;

    /// Unregister one timer. Returns `false` if it was unknown.
    fn unregister_timer(&self, id: TimerId) -> bool;

    /// Unregister every timer of `object`. Returns `false` if it had none.
    fn unregister_timers(&self, object: ObjectId) -> bool;

    /// Timers registered for `object`.
    fn registered_timers(&self, object: ObjectId) -> Vec<TimerInfo>;

    /// Time left before timer `id` fires.
    fn remaining_time(&self, id: TimerId) -> Option<Duration>;

    /// Watch `fd` for `kind` readiness on behalf of `notifier`.
    fn register_socket_notifier(&self, fd: i32, kind: SocketKind, notifier: ObjectId) -> Result<(), DispatcherError>;

    /// Stop watching `fd` for `kind`. Returns `false` if it was not watched.
    fn unregister_socket_notifier(&self, fd: i32, kind: SocketKind) -> bool;

    /// Make a blocked or future wait return. Repeated calls before the
    /// dispatcher runs again are coalesced.
    fn wake_up(&self);

    /// Make the current pass return as soon as possible.
    fn interrupt(&self);

    /// The backend kind.
    fn kind(&self) -> DispatcherKind;
}

/// Create a dispatcher of `kind` for `thread`.
pub fn create(kind: DispatcherKind, thread: &Arc<ThreadData>) -> Result<Arc<dyn EventDispatcher>, DispatcherError> {
    Ok(match kind {
        DispatcherKind::Poll => Arc::new(PollDispatcher::new(thread)?),
        DispatcherKind::Source => Arc::new(SourceDispatcher::new(thread)?),
    })
}

/// Reject calls made from a thread other than `owner`.
fn check_owner(owner: &std::sync::Weak<ThreadData>, operation: &'static str) -> Result<Arc<ThreadData>, DispatcherError> {
    match owner.upgrade() {
        Some(data) if data.is_current() => Ok(data),
        _ => {
            tracing::warn!(
                target: crate::logging::targets::DISPATCHER,
                operation,
                "dispatcher can only be used from its own thread"
            );
            Err(DispatcherError::WrongThread(operation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let flags = ProcessEventsFlags::WAIT_FOR_MORE_EVENTS | ProcessEventsFlags::EVENT_LOOP_EXEC;
        assert!(flags.contains(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS));
        assert!(flags.contains(ProcessEventsFlags::ALL_EVENTS));
        assert!(!flags.contains(ProcessEventsFlags::EXCLUDE_SOCKET_NOTIFIERS));
        assert_eq!(
            flags.without(ProcessEventsFlags::WAIT_FOR_MORE_EVENTS),
            ProcessEventsFlags::EVENT_LOOP_EXEC
        );
        assert_eq!(format!("{flags:?}"), "WAIT_FOR_MORE_EVENTS | EVENT_LOOP_EXEC");
        assert_eq!(format!("{:?}", ProcessEventsFlags::default()), "ALL_EVENTS");
    }

    #[test]
    fn test_create_both_kinds() {
        std::thread::spawn(|| {
            let data = ThreadData::current();
            for kind in [DispatcherKind::Poll, DispatcherKind::Source] {
                let dispatcher = create(kind, &data).unwrap();
                assert_eq!(dispatcher.kind(), kind);
                // Nothing queued: a non-waiting pass returns promptly.
                dispatcher.process_events(ProcessEventsFlags::ALL_EVENTS);
            }
        })
        .join()
        .unwrap();
    }
}
