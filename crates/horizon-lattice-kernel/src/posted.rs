//! Posted-event queues.
//!
//! Each thread owns one [`PostEventList`] (inside its
//! [`ThreadData`](crate::thread::ThreadData)). [`post_event`] appends to the
//! list of the receiver's thread from any thread; [`send_posted_events`]
//! drains the calling thread's list, delivering each event through the
//! notify pipeline with the list unlocked.
//!
//! Ordering: higher priorities first, posting order within a priority.
//! A drain only delivers events that were queued when it started; events
//! posted by handlers wait for the next pass. Drains may nest: an inner
//! full drain continues from where the outer one is and the outer one
//! resumes after it.

use std::sync::Arc;

use parking_lot::MutexGuard;

use crate::event::{Event, EventPriority, EventType};
use crate::logging::targets;
use crate::object::{self, ObjectCore, ObjectId};
use crate::thread::ThreadData;

pub(crate) struct PostedEvent {
    receiver: Arc<ObjectCore>,
    /// `None` marks a hole: delivered, removed or re-posted.
    event: Option<Event>,
    priority: EventPriority,
}

/// The posted events of one thread.
pub(crate) struct PostEventList {
    events: Vec<PostedEvent>,
    /// First entry not yet visited by the current full drain.
    start_offset: usize,
    /// End of the range the running drains deliver.
    insertion_offset: usize,
    /// Number of drains on the stack.
    recursion: u32,
    /// Whether the dispatcher may block.
    can_wait: bool,
}

impl Default for PostEventList {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            start_offset: 0,
            insertion_offset: 0,
            recursion: 0,
            can_wait: true,
        }
    }
}

impl PostEventList {
    fn add_event(&mut self, posted: PostedEvent) {
        let priority = posted.priority;
        let append = self.events.is_empty()
            || self.insertion_offset >= self.events.len()
            || self.events.last().is_some_and(|last| last.priority >= priority);
        if append {
            self.events.push(posted);
        } else {
            let start = self.insertion_offset;
            let at = start + self.events[start..].partition_point(|e| e.priority >= priority);
            self.events.insert(at, posted);
        }
    }

    fn has_queued(&self, receiver: &Arc<ObjectCore>, event_type: EventType) -> bool {
        self.events.iter().any(|pe| {
            Arc::ptr_eq(&pe.receiver, receiver)
                && pe.event.as_ref().is_some_and(|e| e.event_type() == event_type)
        })
    }

    /// Drop holes. Only valid while no drain is running.
    fn compact(&mut self) {
        debug_assert_eq!(self.recursion, 0);
        self.events.retain(|pe| pe.event.is_some());
        self.start_offset = 0;
        self.insertion_offset = self.insertion_offset.min(self.events.len());
    }

    /// Number of queued events.
    pub(crate) fn pending(&self) -> usize {
        self.events.iter().filter(|pe| pe.event.is_some()).count()
    }
}

/// Lock the posted list of the thread `receiver` lives in and run `f`.
///
/// The object may move between threads while the lock is being taken; the
/// lookup is retried until the locked list is the one of the receiver's
/// current thread.
fn with_receiver_list<R>(
    receiver: &ObjectCore,
    f: impl FnOnce(&Arc<ThreadData>, &mut PostEventList) -> R,
) -> (Arc<ThreadData>, R) {
    loop {
        let data = receiver.thread();
        let mut list = data.posted.lock();
        if Arc::ptr_eq(&data, &receiver.thread()) {
            let result = f(&data, &mut list);
            drop(list);
            return (data, result);
        }
    }
}

enum PostOutcome {
    Queued,
    Compressed,
    ReceiverDying,
}

/// Queue `event` for `receiver` and wake its thread.
///
/// Safe to call from any thread. A `DeferredDelete` or `Quit` is dropped if
/// an event of the same type is already queued for the receiver.
pub fn post_event(receiver: ObjectId, event: Event, priority: EventPriority) {
    match object::core(receiver) {
        Some(core) => post_event_to(&core, event, priority),
        None => {
            tracing::warn!(target: targets::EVENT, ?receiver, event = ?event.event_type(), "unexpected null receiver");
        }
    }
}

pub(crate) fn post_event_to(receiver: &Arc<ObjectCore>, mut event: Event, priority: EventPriority) {
    let current = ThreadData::current();
    let event_type = event.event_type();
    let (data, outcome) = with_receiver_list(receiver, |data, list| {
        if receiver.is_being_destroyed() {
            return PostOutcome::ReceiverDying;
        }
        if matches!(event_type, EventType::DeferredDelete | EventType::Quit)
            && receiver.posted_events() > 0
            && list.has_queued(receiver, event_type)
        {
            return PostOutcome::Compressed;
        }
        if event_type == EventType::DeferredDelete && Arc::ptr_eq(data, &current) {
            event.set_deferred_level(data.loop_level());
        }
        event.set_posted(true);
        list.add_event(PostedEvent {
            receiver: receiver.clone(),
            event: Some(event),
            priority,
        });
        receiver.posted_events.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        list.can_wait = false;
        PostOutcome::Queued
    });

    match outcome {
        PostOutcome::Queued => {
            tracing::trace!(target: targets::EVENT, receiver = ?receiver.id(), ?event_type, ?priority, "event posted");
            data.wake_up();
        }
        PostOutcome::Compressed => {
            tracing::trace!(target: targets::EVENT, receiver = ?receiver.id(), ?event_type, "event compressed");
        }
        PostOutcome::ReceiverDying => {
            tracing::warn!(
                target: targets::EVENT,
                receiver = ?receiver.id(),
                ?event_type,
                "cannot post events to an object that is being destroyed"
            );
        }
    }
}

/// Deliver the calling thread's posted events.
///
/// With `receiver` set, only that object's events are delivered; with
/// `event_type` set, only events of that type. Passing
/// `Some(EventType::DeferredDelete)` also delivers deferred deletes posted
/// at the current loop level. Returns whether anything was delivered.
#[tracing::instrument(skip_all, target = "horizon_lattice_kernel::event", level = "trace")]
pub fn send_posted_events(receiver: Option<ObjectId>, event_type: Option<EventType>) -> bool {
    let receiver_core = match receiver {
        Some(id) => match object::core(id) {
            Some(core) => Some(core),
            None => return false,
        },
        None => None,
    };
    send_posted_events_in(&ThreadData::current(), receiver_core.as_ref(), event_type)
}

pub(crate) fn send_posted_events_in(
    data: &Arc<ThreadData>,
    receiver: Option<&Arc<ObjectCore>>,
    event_type: Option<EventType>,
) -> bool {
    if let Some(receiver) = receiver {
        if receiver.thread().serial() != data.serial() {
            tracing::warn!(
                target: targets::EVENT,
                receiver = ?receiver.id(),
                "cannot send posted events for objects in another thread"
            );
            return false;
        }
    }

    let full_drain = receiver.is_none() && event_type.is_none();
    let mut list = data.posted.lock();
    list.recursion += 1;
    list.can_wait = list.events.is_empty();
    if list.events.is_empty() || receiver.is_some_and(|r| r.posted_events() == 0) {
        list.recursion -= 1;
        return false;
    }
    list.can_wait = true;
    list.insertion_offset = list.events.len();

    let mut delivered = false;
    let mut cursor = list.start_offset;
    loop {
        if full_drain {
            cursor = list.start_offset;
        }
        if cursor >= list.insertion_offset || cursor >= list.events.len() {
            break;
        }
        let index = cursor;
        cursor += 1;
        if full_drain {
            list.start_offset = cursor;
        }

        let entry = &list.events[index];
        let Some(event) = entry.event.as_ref() else {
            continue;
        };
        if receiver.is_some_and(|r| !Arc::ptr_eq(r, &entry.receiver))
            || event_type.is_some_and(|t| t != event.event_type())
        {
            list.can_wait = false;
            continue;
        }

        if event.event_type() == EventType::DeferredDelete {
            let event_level = event.deferred_level().unwrap_or(0);
            let loop_level = data.loop_level();
            let allowed = event_level > loop_level
                || (event_level == 0 && loop_level > 0)
                || (event_type == Some(EventType::DeferredDelete) && event_level == loop_level);
            if !allowed {
                if full_drain {
                    // Re-post at the end so a nested drain skips it.
                    let entry = &mut list.events[index];
                    let moved = PostedEvent {
                        receiver: entry.receiver.clone(),
                        event: entry.event.take(),
                        priority: entry.priority,
                    };
                    list.add_event(moved);
                }
                continue;
            }
        }

        let entry = &mut list.events[index];
        let Some(mut event) = entry.event.take() else {
            continue;
        };
        let target = entry.receiver.clone();
        target.posted_events.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        event.set_posted(false);
        MutexGuard::unlocked(&mut list, move || {
            if target.id().is_valid() {
                object::notify(&target, &mut event);
            }
        });
        delivered = true;
    }

    list.recursion -= 1;
    let wake = list.recursion == 0 && !list.can_wait;
    if full_drain && list.recursion == 0 {
        let start = list.start_offset;
        list.events.drain(..start);
        list.insertion_offset = list.insertion_offset.saturating_sub(start);
        list.start_offset = 0;
    }
    drop(list);
    if wake {
        data.wake_up();
    }
    delivered
}

/// Withdraw queued events.
///
/// `receiver` limits removal to one object (following it to whatever thread
/// it lives in); `None` removes from the calling thread's list. `event_type`
/// limits removal to one type. Removed events are dropped after the list
/// is unlocked, so blocked emitters waiting on them are released.
pub fn remove_posted_events(receiver: Option<ObjectId>, event_type: Option<EventType>) {
    match receiver {
        Some(id) => {
            if let Some(core) = object::core(id) {
                remove_posted_events_for(&core, event_type);
            }
        }
        None => {
            let data = ThreadData::current();
            let removed = remove_matching(&mut data.posted.lock(), None, event_type);
            drop(removed);
        }
    }
}

pub(crate) fn remove_posted_events_for(receiver: &Arc<ObjectCore>, event_type: Option<EventType>) {
    let (_, removed) = with_receiver_list(receiver, |_, list| remove_matching(list, Some(receiver), event_type));
    if !removed.is_empty() {
        tracing::trace!(target: targets::EVENT, receiver = ?receiver.id(), count = removed.len(), "posted events removed");
    }
}

fn remove_matching(
    list: &mut PostEventList,
    receiver: Option<&Arc<ObjectCore>>,
    event_type: Option<EventType>,
) -> Vec<Event> {
    let mut removed = Vec::new();
    for entry in list.events.iter_mut() {
        let matches = receiver.is_none_or(|r| Arc::ptr_eq(r, &entry.receiver))
            && entry
                .event
                .as_ref()
                .is_some_and(|e| event_type.is_none_or(|t| t == e.event_type()));
        if matches {
            if let Some(mut event) = entry.event.take() {
                entry.receiver.posted_events.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
                event.set_posted(false);
                removed.push(event);
            }
        }
    }
    if list.recursion == 0 {
        list.compact();
    }
    removed
}

/// Move the queued events of `cores` from `from`'s list to `to`'s and
/// switch the objects' thread. Both lists stay locked throughout so
/// concurrent posters follow the objects to their new thread.
pub(crate) fn rehome(cores: &[Arc<ObjectCore>], from: &Arc<ThreadData>, to: &Arc<ThreadData>) {
    let (mut source, mut target) = if from.serial() < to.serial() {
        let source = from.posted.lock();
        (source, to.posted.lock())
    } else {
        let target = to.posted.lock();
        (from.posted.lock(), target)
    };

    let mut moved = 0usize;
    for index in 0..source.events.len() {
        let entry = &mut source.events[index];
        if entry.event.is_none() || !cores.iter().any(|c| Arc::ptr_eq(c, &entry.receiver)) {
            continue;
        }
        let posted = PostedEvent {
            receiver: entry.receiver.clone(),
            event: entry.event.take(),
            priority: entry.priority,
        };
        target.add_event(posted);
        moved += 1;
    }
    if source.recursion == 0 {
        source.compact();
    }

    for core in cores {
        core.set_thread(to.clone());
    }
    if moved > 0 {
        target.can_wait = false;
    }
    drop(target);
    drop(source);

    if moved > 0 {
        tracing::trace!(target: targets::EVENT, from = from.serial(), to = to.serial(), moved, "posted events moved");
        to.wake_up();
    }
}

/// Whether the calling thread has queued events.
pub fn has_pending_events() -> bool {
    ThreadData::current().posted.lock().pending() > 0
}

/// Whether the dispatcher of `data` may block waiting for events.
pub(crate) fn can_wait(data: &ThreadData) -> bool {
    data.posted.lock().can_wait
}

/// Clear the flag so the next dispatch pass does not block.
pub(crate) fn interrupt_wait(data: &ThreadData) {
    data.posted.lock().can_wait = false;
}
