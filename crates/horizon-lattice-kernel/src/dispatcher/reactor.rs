//! Readiness polling shared by both dispatcher backends.
//!
//! Wraps a `mio` poller with a waker on token 0; watched file descriptors use
//! token `fd + 1`. `mio` reports edges, so a descriptor is re-armed after its
//! notifiers have run, which gives level-triggered notifiers.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use super::SocketKind;
use crate::error::DispatcherError;
use crate::event::Event;
use crate::logging::targets;
use crate::object::{self, ObjectId};

const WAKE_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 128;

#[cfg(any(target_os = "linux", target_os = "android"))]
const EXCEPTION_INTEREST: Interest = Interest::PRIORITY;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const EXCEPTION_INTEREST: Interest = Interest::READABLE;

/// Notifier objects watching one descriptor.
#[derive(Debug, Default, Clone, Copy)]
struct Watch {
    read: Option<ObjectId>,
    write: Option<ObjectId>,
    exception: Option<ObjectId>,
}

impl Watch {
    fn slot(&mut self, kind: SocketKind) -> &mut Option<ObjectId> {
        match kind {
            SocketKind::Read => &mut self.read,
            SocketKind::Write => &mut self.write,
            SocketKind::Exception => &mut self.exception,
        }
    }

    fn get(&self, kind: SocketKind) -> Option<ObjectId> {
        match kind {
            SocketKind::Read => self.read,
            SocketKind::Write => self.write,
            SocketKind::Exception => self.exception,
        }
    }

    fn interest(&self) -> Option<Interest> {
        [
            (self.read, Interest::READABLE),
            (self.write, Interest::WRITABLE),
            (self.exception, EXCEPTION_INTEREST),
        ]
        .into_iter()
        .filter(|(notifier, _)| notifier.is_some())
        .map(|(_, interest)| interest)
        .reduce(|a, b| a | b)
    }
}

/// Readiness reported for one descriptor and not yet delivered.
#[derive(Debug, Clone, Copy)]
struct Ready {
    fd: i32,
    read: bool,
    write: bool,
    exception: bool,
}

impl Ready {
    fn has(&self, kind: SocketKind) -> bool {
        match kind {
            SocketKind::Read => self.read,
            SocketKind::Write => self.write,
            SocketKind::Exception => self.exception,
        }
    }
}

struct Poller {
    poll: Poll,
    events: Events,
}

pub(crate) struct Reactor {
    poller: Mutex<Poller>,
    registry: Registry,
    waker: Waker,
    woken: AtomicBool,
    watches: Mutex<HashMap<i32, Watch>>,
    ready: Mutex<Vec<Ready>>,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poller: Mutex::new(Poller {
                poll,
                events: Events::with_capacity(EVENTS_CAPACITY),
            }),
            registry,
            waker,
            woken: AtomicBool::new(false),
            watches: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
        })
    }

    /// Wake the poller unless a wake-up is already pending.
    pub(crate) fn wake_up(&self) {
        if !self.woken.swap(true, Ordering::AcqRel) {
            self.force_wake();
        }
    }

    /// Wake the poller regardless of pending wake-ups.
    pub(crate) fn force_wake(&self) {
        if let Err(err) = self.waker.wake() {
            tracing::warn!(target: targets::DISPATCHER, %err, "failed to wake dispatcher");
        }
    }

    /// Accept new wake-ups. Called at the start of a pass, before the posted
    /// events are drained.
    pub(crate) fn clear_wake(&self) {
        self.woken.store(false, Ordering::Release);
    }

    /// Wait up to `timeout` (forever if `None`). Returns whether the waker fired.
    pub(crate) fn poll(&self, timeout: Option<Duration>) -> bool {
        let mut poller = self.poller.lock();
        let Poller { poll, events } = &mut *poller;
        if let Err(err) = poll.poll(events, timeout) {
            if err.kind() != io::ErrorKind::Interrupted {
                tracing::warn!(target: targets::DISPATCHER, %err, "poll failed");
            }
            return false;
        }

        let mut woke = false;
        let mut ready = self.ready.lock();
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                woke = true;
                continue;
            }
            let fd = (event.token().0 - 1) as i32;
            let entry = Ready {
                fd,
                read: event.is_readable() || event.is_read_closed(),
                write: event.is_writable() || event.is_write_closed(),
                exception: event.is_priority() || event.is_error(),
            };
            match ready.iter_mut().find(|r| r.fd == fd) {
                Some(existing) => {
                    existing.read |= entry.read;
                    existing.write |= entry.write;
                    existing.exception |= entry.exception;
                }
                None => ready.push(entry),
            }
        }
        woke
    }

    /// Whether readiness is waiting to be delivered.
    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.lock().is_empty()
    }

    /// Watch `fd` for `kind` on behalf of `notifier`.
    pub(crate) fn watch(&self, fd: i32, kind: SocketKind, notifier: ObjectId) -> Result<(), DispatcherError> {
        if fd < 0 {
            return Err(DispatcherError::Io(io::Error::from(io::ErrorKind::InvalidInput)));
        }
        let mut watches = self.watches.lock();
        let existing = watches.get(&fd).copied();
        let mut watch = existing.unwrap_or_default();
        if watch.get(kind).is_some() {
            tracing::warn!(target: targets::DISPATCHER, fd, ?kind, "multiple socket notifiers for same socket");
            return Err(DispatcherError::NotifierExists(fd));
        }
        *watch.slot(kind) = Some(notifier);
        let Some(interest) = watch.interest() else {
            return Ok(());
        };
        if existing.is_some() {
            reregister_fd(&self.registry, fd, interest)?;
        } else {
            register_fd(&self.registry, fd, interest)?;
        }
        watches.insert(fd, watch);
        tracing::trace!(target: targets::DISPATCHER, fd, ?kind, "socket notifier registered");
        Ok(())
    }

    /// Stop watching `fd` for `kind`.
    pub(crate) fn unwatch(&self, fd: i32, kind: SocketKind) -> bool {
        let mut watches = self.watches.lock();
        let Some(watch) = watches.get_mut(&fd) else {
            return false;
        };
        if watch.slot(kind).take().is_none() {
            return false;
        }
        let result = match watch.interest() {
            Some(interest) => reregister_fd(&self.registry, fd, interest),
            None => {
                watches.remove(&fd);
                deregister_fd(&self.registry, fd)
            }
        };
        if let Err(err) = result {
            tracing::warn!(target: targets::DISPATCHER, fd, %err, "failed to update socket registration");
        }
        tracing::trace!(target: targets::DISPATCHER, fd, ?kind, "socket notifier unregistered");
        true
    }

    /// Deliver pending readiness to the watching notifiers.
    ///
    /// Each notifier receives a `SocketActivate` event; descriptors still
    /// watched afterwards are re-armed. Returns the number of events sent.
    pub(crate) fn activate_sockets(&self) -> usize {
        let ready = std::mem::take(&mut *self.ready.lock());
        let mut delivered = 0;
        for entry in ready {
            for kind in [SocketKind::Exception, SocketKind::Read, SocketKind::Write] {
                if !entry.has(kind) {
                    continue;
                }
                // A handler run earlier in this pass may have removed it.
                let notifier = self.watches.lock().get(&entry.fd).and_then(|w| w.get(kind));
                if let Some(notifier) = notifier {
                    let mut event = Event::socket_activate(entry.fd);
                    object::send_event(notifier, &mut event);
                    delivered += 1;
                }
            }
            let interest = self.watches.lock().get(&entry.fd).and_then(|w| w.interest());
            if let Some(interest) = interest {
                if let Err(err) = reregister_fd(&self.registry, entry.fd, interest) {
                    tracing::warn!(target: targets::DISPATCHER, fd = entry.fd, %err, "failed to re-arm socket");
                }
            }
        }
        delivered
    }

    /// Number of watched descriptors.
    pub(crate) fn watched(&self) -> usize {
        self.watches.lock().len()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        for fd in self.watches.get_mut().keys() {
            let _ = deregister_fd(&self.registry, *fd);
        }
    }
}

fn token_for(fd: i32) -> Token {
    Token(fd as usize + 1)
}

#[cfg(unix)]
fn register_fd(registry: &Registry, fd: i32, interest: Interest) -> io::Result<()> {
    registry.register(&mut mio::unix::SourceFd(&fd), token_for(fd), interest)
}

#[cfg(unix)]
fn reregister_fd(registry: &Registry, fd: i32, interest: Interest) -> io::Result<()> {
    registry.reregister(&mut mio::unix::SourceFd(&fd), token_for(fd), interest)
}

#[cfg(unix)]
fn deregister_fd(registry: &Registry, fd: i32) -> io::Result<()> {
    registry.deregister(&mut mio::unix::SourceFd(&fd))
}

#[cfg(not(unix))]
fn register_fd(_registry: &Registry, _fd: i32, _interest: Interest) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(unix))]
fn reregister_fd(_registry: &Registry, _fd: i32, _interest: Interest) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(unix))]
fn deregister_fd(_registry: &Registry, _fd: i32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_wake_up_interrupts_poll() {
        let reactor = Reactor::new().unwrap();
        reactor.wake_up();
        let start = Instant::now();
        assert!(reactor.poll(Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_ups_are_coalesced() {
        let reactor = Reactor::new().unwrap();
        reactor.wake_up();
        assert!(reactor.woken.load(Ordering::Acquire));
        // Second call sees the pending flag and does not write again.
        reactor.wake_up();
        reactor.clear_wake();
        assert!(!reactor.woken.load(Ordering::Acquire));
    }

    #[test]
    fn test_poll_times_out() {
        let reactor = Reactor::new().unwrap();
        assert!(!reactor.poll(Some(Duration::from_millis(1))));
        assert!(!reactor.has_ready());
    }

    #[cfg(unix)]
    #[test]
    fn test_duplicate_watch_is_rejected() {
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let reactor = Reactor::new().unwrap();
        let notifier = ObjectId::default();
        reactor.watch(fd, SocketKind::Read, notifier).unwrap();
        assert!(matches!(
            reactor.watch(fd, SocketKind::Read, notifier),
            Err(DispatcherError::NotifierExists(_))
        ));
        reactor.watch(fd, SocketKind::Write, notifier).unwrap();
        assert_eq!(reactor.watched(), 1);
        assert!(reactor.unwatch(fd, SocketKind::Read));
        assert!(!reactor.unwatch(fd, SocketKind::Read));
        assert!(reactor.unwatch(fd, SocketKind::Write));
        assert_eq!(reactor.watched(), 0);
    }
}
