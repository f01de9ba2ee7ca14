//! Static per-class meta descriptors.
//!
//! A [`MetaDescriptor`] is the read-only table describing the signals, slots
//! and properties of one object class. Descriptors are plain `static` items,
//! chained to their superclass; indices are absolute across the chain, with
//! inherited entries first.
//!
//! ```
//! use horizon_lattice_kernel::meta::{MetaDescriptor, MethodMeta, OBJECT_META};
//!
//! static COUNTER_META: MetaDescriptor = MetaDescriptor::new("Counter", Some(&OBJECT_META))
//!     .with_signals(&[MethodMeta::new("value_changed", &["i32"])])
//!     .with_slots(&[MethodMeta::new("set_value", &["i32"])]);
//!
//! let index = COUNTER_META.index_of_signal("value_changed").unwrap();
//! assert_eq!(index, OBJECT_META.signal_count());
//! ```

use std::fmt;

/// Index of the `destroyed(ObjectId)` signal every object has.
pub const DESTROYED_SIGNAL: usize = 0;

/// Index of the `object_name_changed(String)` signal every object has.
pub const OBJECT_NAME_CHANGED_SIGNAL: usize = 1;

/// Number of signals for which a connection bitmap is kept per object.
pub(crate) const SIGNAL_BITMAP_BITS: usize = 64;

/// Description of a signal or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodMeta {
    /// Method name.
    pub name: &'static str,
    /// Parameter type tags (meta-type names).
    pub parameters: &'static [&'static str],
}

impl MethodMeta {
    /// Create a method description.
    pub const fn new(name: &'static str, parameters: &'static [&'static str]) -> Self {
        Self { name, parameters }
    }

    /// Normalized signature, e.g. `value_changed(i32)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.parameters.join(","))
    }
}

/// Description of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMeta {
    /// Property name.
    pub name: &'static str,
    /// Meta-type name of the property value.
    pub type_name: &'static str,
    /// Name of the notify signal, if any.
    pub notify: Option<&'static str>,
}

impl PropertyMeta {
    /// Create a property description.
    pub const fn new(
        name: &'static str,
        type_name: &'static str,
        notify: Option<&'static str>,
    ) -> Self {
        Self {
            name,
            type_name,
            notify,
        }
    }
}

/// Static reflection table for one object class.
pub struct MetaDescriptor {
    class_name: &'static str,
    superclass: Option<&'static MetaDescriptor>,
    signals: &'static [MethodMeta],
    slots: &'static [MethodMeta],
    properties: &'static [PropertyMeta],
}

impl MetaDescriptor {
    /// Create an empty descriptor.
    pub const fn new(class_name: &'static str, superclass: Option<&'static MetaDescriptor>) -> Self {
        Self {
            class_name,
            superclass,
            signals: &[],
            slots: &[],
            properties: &[],
        }
    }

    /// Set the signals declared by this class.
    pub const fn with_signals(self, signals: &'static [MethodMeta]) -> Self {
        Self { signals, ..self }
    }

    /// Set the slots declared by this class.
    pub const fn with_slots(self, slots: &'static [MethodMeta]) -> Self {
        Self { slots, ..self }
    }

    /// Set the properties declared by this class.
    pub const fn with_properties(self, properties: &'static [PropertyMeta]) -> Self {
        Self { properties, ..self }
    }

    /// The class name.
    pub fn class_name(&self) -> &'static str {
        self.class_name
    }

    /// The superclass descriptor.
    pub fn superclass(&self) -> Option<&'static MetaDescriptor> {
        self.superclass
    }

    /// Index of the first signal declared by this class.
    pub fn signal_offset(&self) -> usize {
        self.superclass.map_or(0, |s| s.signal_count())
    }

    /// Total number of signals, inherited ones included.
    pub fn signal_count(&self) -> usize {
        self.signal_offset() + self.signals.len()
    }

    /// Index of the first slot declared by this class.
    pub fn slot_offset(&self) -> usize {
        self.superclass.map_or(0, |s| s.slot_count())
    }

    /// Total number of slots, inherited ones included.
    pub fn slot_count(&self) -> usize {
        self.slot_offset() + self.slots.len()
    }

    /// Look up a signal by absolute index.
    pub fn signal(&self, index: usize) -> Option<&'static MethodMeta> {
        let offset = self.signal_offset();
        if index >= offset {
            self.signals.get(index - offset)
        } else {
            self.superclass.and_then(|s| s.signal(index))
        }
    }

    /// Look up a slot by absolute index.
    pub fn slot(&self, index: usize) -> Option<&'static MethodMeta> {
        let offset = self.slot_offset();
        if index >= offset {
            self.slots.get(index - offset)
        } else {
            self.superclass.and_then(|s| s.slot(index))
        }
    }

    /// Absolute index of the signal with the given name.
    ///
    /// The most derived declaration wins when a name is redeclared.
    pub fn index_of_signal(&self, name: &str) -> Option<usize> {
        self.signals
            .iter()
            .position(|m| m.name == name)
            .map(|local| self.signal_offset() + local)
            .or_else(|| self.superclass.and_then(|s| s.index_of_signal(name)))
    }

    /// Absolute index of the slot with the given name.
    pub fn index_of_slot(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|m| m.name == name)
            .map(|local| self.slot_offset() + local)
            .or_else(|| self.superclass.and_then(|s| s.index_of_slot(name)))
    }

    /// Look up a declared property by name, searching superclasses.
    pub fn property(&self, name: &str) -> Option<&'static PropertyMeta> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.superclass.and_then(|s| s.property(name)))
    }

    /// Whether this class is `other` or derives from it.
    pub fn inherits(&self, other: &MetaDescriptor) -> bool {
        let mut current = Some(self);
        while let Some(meta) = current {
            if std::ptr::eq(meta, other) {
                return true;
            }
            current = meta.superclass;
        }
        false
    }
}

impl fmt::Debug for MetaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaDescriptor")
            .field("class_name", &self.class_name)
            .field("superclass", &self.superclass.map(|s| s.class_name))
            .field("signals", &self.signal_count())
            .field("slots", &self.slot_count())
            .finish()
    }
}

/// Descriptor shared by every object.
pub static OBJECT_META: MetaDescriptor = MetaDescriptor::new("Object", None)
    .with_signals(&[
        MethodMeta::new("destroyed", &["ObjectId"]),
        MethodMeta::new("object_name_changed", &["String"]),
    ])
    .with_slots(&[MethodMeta::new("delete_later", &[])])
    .with_properties(&[PropertyMeta::new(
        "object_name",
        "String",
        Some("object_name_changed"),
    )]);

/// Slot index of `delete_later()` on every object.
pub const DELETE_LATER_SLOT: usize = 0;

#[cfg(test)]
mod tests {
    use super::*;

    static BASE: MetaDescriptor = MetaDescriptor::new("Base", Some(&OBJECT_META))
        .with_signals(&[MethodMeta::new("clicked", &[]), MethodMeta::new("toggled", &["bool"])])
        .with_slots(&[MethodMeta::new("toggle", &[])]);

    static DERIVED: MetaDescriptor = MetaDescriptor::new("Derived", Some(&BASE))
        .with_signals(&[MethodMeta::new("value_changed", &["i32", "String"])])
        .with_slots(&[MethodMeta::new("set_value", &["i32"])])
        .with_properties(&[PropertyMeta::new("value", "i32", Some("value_changed"))]);

    #[test]
    fn test_signal_offsets() {
        assert_eq!(OBJECT_META.signal_offset(), 0);
        assert_eq!(BASE.signal_offset(), 2);
        assert_eq!(DERIVED.signal_offset(), 4);
        assert_eq!(DERIVED.signal_count(), 5);
    }

    #[test]
    fn test_lookup_by_index_walks_chain() {
        assert_eq!(DERIVED.signal(DESTROYED_SIGNAL).unwrap().name, "destroyed");
        assert_eq!(DERIVED.signal(3).unwrap().name, "toggled");
        assert_eq!(DERIVED.signal(4).unwrap().name, "value_changed");
        assert!(DERIVED.signal(5).is_none());
        assert_eq!(DERIVED.slot(DELETE_LATER_SLOT).unwrap().name, "delete_later");
        assert_eq!(DERIVED.slot(2).unwrap().name, "set_value");
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(DERIVED.index_of_signal("clicked"), Some(2));
        assert_eq!(DERIVED.index_of_signal("object_name_changed"), Some(1));
        assert_eq!(DERIVED.index_of_slot("set_value"), Some(2));
        assert_eq!(DERIVED.index_of_signal("missing"), None);
    }

    #[test]
    fn test_inherits() {
        assert!(DERIVED.inherits(&BASE));
        assert!(DERIVED.inherits(&OBJECT_META));
        assert!(!BASE.inherits(&DERIVED));
    }

    #[test]
    fn test_property_lookup() {
        assert_eq!(DERIVED.property("value").unwrap().type_name, "i32");
        assert_eq!(DERIVED.property("object_name").unwrap().notify, Some("object_name_changed"));
        assert!(BASE.property("value").is_none());
    }

    #[test]
    fn test_signature() {
        assert_eq!(DERIVED.signal(4).unwrap().signature(), "value_changed(i32,String)");
    }
}
