//! Shared test objects.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use horizon_lattice_kernel::event::Event;
use horizon_lattice_kernel::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
use horizon_lattice_kernel::object::{self, Object, ObjectBase, ObjectId};

pub static PROBE_META: MetaDescriptor = MetaDescriptor::new("Probe", Some(&OBJECT_META)).with_signals(&[
    MethodMeta::new("fired", &["i32"]),
    MethodMeta::new("payload", &["Vec<i32>", "String"]),
]);

pub type Hook = Box<dyn Fn(&Probe, &mut Event) + Send + Sync>;

/// An object that counts and optionally reacts to user events.
pub struct Probe {
    pub base: ObjectBase,
    pub events: AtomicUsize,
    hook: Option<Hook>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_hook(hook: impl Fn(&Probe, &mut Event) + Send + Sync + 'static) -> Arc<Self> {
        Self::build(Some(Box::new(hook)))
    }

    fn build(hook: Option<Hook>) -> Arc<Self> {
        object::register(Self {
            base: ObjectBase::new::<Self>(),
            events: AtomicUsize::new(0),
            hook,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.base.id()
    }

    pub fn fired() -> usize {
        PROBE_META.signal_offset()
    }

    pub fn payload() -> usize {
        PROBE_META.signal_offset() + 1
    }

    pub fn event_count(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }
}

impl Object for Probe {
    fn object_id(&self) -> ObjectId {
        self.base.id()
    }

    fn static_meta() -> &'static MetaDescriptor {
        &PROBE_META
    }

    fn custom_event(&self, event: &mut Event) {
        self.events.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.hook {
            hook(self, event);
        }
    }
}
