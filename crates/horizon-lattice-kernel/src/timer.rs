//! Timers registered with a thread's event dispatcher.
//!
//! Objects start timers with [`ObjectBase::start_timer`](crate::object::ObjectBase::start_timer);
//! each dispatcher keeps a [`TimerList`] for its thread and delivers a
//! [`Timer`](crate::event::EventType::Timer) event to the owning object when
//! a timer expires. Timers repeat until killed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event::Event;
use crate::logging::targets;
use crate::object::{self, ObjectId};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Allocate a fresh, process-wide unique id.
    pub fn allocate() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// The raw id value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Accuracy of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimerType {
    /// Millisecond accuracy.
    Precise,
    /// Millisecond accuracy; the default.
    #[default]
    Coarse,
    /// Interval rounded to whole seconds.
    VeryCoarse,
}

impl TimerType {
    fn effective_interval(self, interval: Duration) -> Duration {
        match self {
            Self::Precise | Self::Coarse => interval,
            Self::VeryCoarse => {
                let millis = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
                Duration::from_secs(millis.saturating_add(500) / 1000)
            }
        }
    }
}

/// A registered timer as reported by [`EventDispatcher::registered_timers`](crate::dispatcher::EventDispatcher::registered_timers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerInfo {
    /// The timer's id.
    pub id: TimerId,
    /// Requested interval.
    pub interval: Duration,
    /// Requested accuracy.
    pub timer_type: TimerType,
}

#[derive(Debug)]
struct TimerData {
    object: ObjectId,
    interval: Duration,
    timer_type: TimerType,
    next_fire: Instant,
    in_timer_event: bool,
}

/// Entry in the fire queue. Entries whose time no longer matches the
/// timer's `next_fire` are stale and skipped.
#[derive(Debug, Clone, Copy)]
struct TimerQueueEntry {
    id: TimerId,
    fire_time: Instant,
}

impl PartialEq for TimerQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_time == other.fire_time && self.id == other.id
    }
}

impl Eq for TimerQueueEntry {}

impl PartialOrd for TimerQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap.
        other
            .fire_time
            .cmp(&self.fire_time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The timers of one dispatcher.
#[derive(Debug, Default)]
pub struct TimerList {
    timers: HashMap<TimerId, TimerData>,
    queue: BinaryHeap<TimerQueueEntry>,
}

impl TimerList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer firing every `interval` for `object`.
    pub fn register(&mut self, id: TimerId, interval: Duration, timer_type: TimerType, object: ObjectId) {
        let next_fire = Instant::now() + timer_type.effective_interval(interval);
        self.timers.insert(
            id,
            TimerData {
                object,
                interval,
                timer_type,
                next_fire,
                in_timer_event: false,
            },
        );
        self.queue.push(TimerQueueEntry { id, fire_time: next_fire });
    }

    /// Remove a timer. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Remove every timer of `object`. Returns `false` if it had none.
    pub fn unregister_object(&mut self, object: ObjectId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|_, t| t.object != object);
        before != self.timers.len()
    }

    /// The timers of `object`.
    pub fn registered(&self, object: ObjectId) -> Vec<TimerInfo> {
        let mut timers: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, t)| t.object == object)
            .map(|(&id, t)| TimerInfo {
                id,
                interval: t.interval,
                timer_type: t.timer_type,
            })
            .collect();
        timers.sort_by_key(|t| t.id);
        timers
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Number of registered timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Time left until `id` fires.
    pub fn remaining_time(&self, id: TimerId) -> Option<Duration> {
        self.timers
            .get(&id)
            .map(|t| t.next_fire.saturating_duration_since(Instant::now()))
    }

    fn is_live(&self, entry: &TimerQueueEntry) -> bool {
        self.timers
            .get(&entry.id)
            .is_some_and(|t| t.next_fire == entry.fire_time)
    }

    /// Time until the next timer that is not currently in its handler fires.
    pub fn time_until_next(&mut self) -> Option<Duration> {
        while let Some(entry) = self.queue.peek() {
            if self.is_live(entry) {
                break;
            }
            self.queue.pop();
        }
        let head = self.queue.peek()?;
        let next = match self.timers.get(&head.id) {
            Some(t) if !t.in_timer_event => Some(head.fire_time),
            _ => self
                .timers
                .values()
                .filter(|t| !t.in_timer_event)
                .map(|t| t.next_fire)
                .min(),
        }?;
        Some(next.saturating_duration_since(Instant::now()))
    }

    /// Collect the timers expired at `now`, reschedule them and mark them
    /// as in their handler. Timers still in their handler are skipped.
    fn take_expired(&mut self, now: Instant) -> Vec<(TimerId, ObjectId)> {
        let mut expired = Vec::new();
        let mut busy = Vec::new();
        while let Some(&entry) = self.queue.peek() {
            if entry.fire_time > now {
                break;
            }
            self.queue.pop();
            if !self.is_live(&entry) {
                continue;
            }
            let Some(timer) = self.timers.get_mut(&entry.id) else {
                continue;
            };
            if timer.in_timer_event {
                busy.push(entry);
                continue;
            }
            let interval = timer.timer_type.effective_interval(timer.interval);
            timer.next_fire = (timer.next_fire + interval).max(now);
            timer.in_timer_event = true;
            self.queue.push(TimerQueueEntry {
                id: entry.id,
                fire_time: timer.next_fire,
            });
            expired.push((entry.id, timer.object));
        }
        self.queue.extend(busy);
        expired
    }

    fn finish(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.get_mut(&id) {
            timer.in_timer_event = false;
        }
    }
}

/// Deliver a timer event for every expired timer in `timers`.
///
/// The list lock is released while each event is delivered, so handlers
/// may start and kill timers. Returns the number of events delivered.
pub(crate) fn activate_timers(timers: &Mutex<TimerList>) -> usize {
    let expired = timers.lock().take_expired(Instant::now());
    let mut delivered = 0;
    for (id, receiver) in expired {
        if !timers.lock().contains(id) {
            // Killed by an earlier handler in this pass.
            continue;
        }
        if !receiver.is_valid() {
            tracing::trace!(target: targets::TIMER, ?id, "dropping timer of destroyed object");
            timers.lock().unregister(id);
            continue;
        }
        tracing::trace!(target: targets::TIMER, ?id, ?receiver, "timer fired");
        let mut event = Event::timer(id);
        object::send_event(receiver, &mut event);
        delivered += 1;
        timers.lock().finish(id);
    }
    delivered
}
