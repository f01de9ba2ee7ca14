//! Events delivered to objects.
//!
//! An [`Event`] is either sent synchronously through the notify pipeline
//! ([`send_event`](crate::object::send_event)) or posted to the receiver's
//! thread queue ([`post_event`](crate::posted::post_event)).

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::object::ObjectId;
use crate::slot::QueuedCall;
use crate::timer::TimerId;

/// First event number available for user-defined events.
pub const USER_EVENT_BASE: u16 = 1000;

static NEXT_USER_EVENT: AtomicU32 = AtomicU32::new(u16::MAX as u32);

/// Priority levels for posted events.
/// Higher priority events are delivered first; equal priorities keep posting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum EventPriority {
    /// Delivered after everything else.
    Low = 0,
    /// Default priority.
    #[default]
    Normal = 1,
    /// Delivered ahead of normal events.
    High = 2,
    /// Delivered first.
    Critical = 3,
}

/// The kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A timer registered by the receiver fired.
    Timer,
    /// Request to leave the event loop.
    Quit,
    /// A socket notifier became ready.
    SocketActivate,
    /// Request to destroy the receiver once the posting loop level has unwound.
    DeferredDelete,
    /// A queued slot invocation.
    MetaCall,
    /// The receiver is about to move to another thread.
    ThreadChange,
    /// A child was added to the receiver.
    ChildAdded,
    /// A child was removed from the receiver.
    ChildRemoved,
    /// A dynamic property was set or cleared.
    DynamicPropertyChange,
    /// The installed translators changed.
    LanguageChange,
    /// A user-defined event type, numbered from [`USER_EVENT_BASE`].
    User(u16),
}

impl EventType {
    /// Whether this is a user-defined type.
    pub fn is_user(self) -> bool {
        matches!(self, Self::User(_))
    }
}

/// Reserve a fresh user event type.
///
/// `hint` is used if it is a free user number, otherwise numbers are handed
/// out downwards from the top of the user range. Returns `None` once the
/// range is exhausted.
pub fn register_event_type(hint: Option<u16>) -> Option<EventType> {
    static USED: parking_lot::Mutex<Vec<u16>> = parking_lot::Mutex::new(Vec::new());
    let mut used = USED.lock();
    if let Some(hint) = hint.filter(|h| *h >= USER_EVENT_BASE && !used.contains(h)) {
        used.push(hint);
        return Some(EventType::User(hint));
    }
    loop {
        let next = NEXT_USER_EVENT.fetch_sub(1, Ordering::Relaxed);
        if next < u32::from(USER_EVENT_BASE) {
            return None;
        }
        let number = next as u16;
        if !used.contains(&number) {
            used.push(number);
            return Some(EventType::User(number));
        }
    }
}

pub(crate) enum EventData {
    None,
    Timer(TimerId),
    Child(ObjectId),
    Property(String),
    Socket(i32),
    DeferredDelete { loop_level: u32 },
    MetaCall(QueuedCall),
    User(Box<dyn Any + Send>),
}

/// An event addressed to one object.
pub struct Event {
    event_type: EventType,
    data: EventData,
    accepted: bool,
    posted: bool,
}

impl Event {
    /// A plain event of the given type.
    pub fn new(event_type: EventType) -> Self {
        Self::with_data(event_type, EventData::None)
    }

    pub(crate) fn with_data(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            data,
            accepted: true,
            posted: false,
        }
    }

    /// A quit request.
    pub fn quit() -> Self {
        Self::new(EventType::Quit)
    }

    /// A deferred-delete request.
    pub fn deferred_delete() -> Self {
        Self::with_data(EventType::DeferredDelete, EventData::DeferredDelete { loop_level: 0 })
    }

    /// A timer event for `timer_id`.
    pub fn timer(timer_id: TimerId) -> Self {
        Self::with_data(EventType::Timer, EventData::Timer(timer_id))
    }

    /// A child-added notification.
    pub fn child_added(child: ObjectId) -> Self {
        Self::with_data(EventType::ChildAdded, EventData::Child(child))
    }

    /// A child-removed notification.
    pub fn child_removed(child: ObjectId) -> Self {
        Self::with_data(EventType::ChildRemoved, EventData::Child(child))
    }

    /// A dynamic-property-change notification.
    pub fn dynamic_property_change(name: impl Into<String>) -> Self {
        Self::with_data(EventType::DynamicPropertyChange, EventData::Property(name.into()))
    }

    pub(crate) fn socket_activate(fd: i32) -> Self {
        Self::with_data(EventType::SocketActivate, EventData::Socket(fd))
    }

    pub(crate) fn meta_call(call: QueuedCall) -> Self {
        Self::with_data(EventType::MetaCall, EventData::MetaCall(call))
    }

    /// A user event carrying an arbitrary payload.
    pub fn user<T: Any + Send>(event_type: EventType, payload: T) -> Self {
        Self::with_data(event_type, EventData::User(Box::new(payload)))
    }

    /// The event type.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Mark the event as accepted.
    pub fn accept(&mut self) {
        self.accepted = true;
    }

    /// Mark the event as ignored.
    pub fn ignore(&mut self) {
        self.accepted = false;
    }

    /// Whether the event was accepted.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// Whether the event currently sits in a posted-event queue.
    pub fn is_posted(&self) -> bool {
        self.posted
    }

    pub(crate) fn set_posted(&mut self, posted: bool) {
        self.posted = posted;
    }

    /// Timer id of a timer event.
    pub fn timer_id(&self) -> Option<TimerId> {
        match self.data {
            EventData::Timer(id) => Some(id),
            _ => None,
        }
    }

    /// Child of a child-added or child-removed event.
    pub fn child(&self) -> Option<ObjectId> {
        match self.data {
            EventData::Child(id) => Some(id),
            _ => None,
        }
    }

    /// Property name of a dynamic-property-change event.
    pub fn property_name(&self) -> Option<&str> {
        match &self.data {
            EventData::Property(name) => Some(name),
            _ => None,
        }
    }

    /// Descriptor of a socket-activate event.
    pub fn socket(&self) -> Option<i32> {
        match self.data {
            EventData::Socket(fd) => Some(fd),
            _ => None,
        }
    }

    /// Payload of a user event.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        match &self.data {
            EventData::User(payload) => payload.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Loop level recorded when a deferred delete was posted.
    pub(crate) fn deferred_level(&self) -> Option<u32> {
        match self.data {
            EventData::DeferredDelete { loop_level } => Some(loop_level),
            _ => None,
        }
    }

    pub(crate) fn set_deferred_level(&mut self, level: u32) {
        if let EventData::DeferredDelete { loop_level } = &mut self.data {
            *loop_level = level;
        }
    }

    pub(crate) fn take_meta_call(&mut self) -> Option<QueuedCall> {
        match std::mem::replace(&mut self.data, EventData::None) {
            EventData::MetaCall(call) => Some(call),
            other => {
                self.data = other;
                None
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.event_type)
            .field("accepted", &self.accepted)
            .field("posted", &self.posted)
            .finish()
    }
}

static_assertions::assert_impl_all!(Event: Send);
