//! Meta-type registry and type-erased argument values.
//!
//! Signal arguments travel as [`Arguments`], an ordered list of [`Value`]s.
//! Each value carries a monomorphized copy function, so cloning an argument
//! list is a deep copy even though the element types are erased. Queued
//! delivery additionally requires every argument type to be registered here,
//! mirroring the rule that only known meta types may cross a thread boundary.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::object::ObjectId;

/// Identifier of a registered meta type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetaTypeId(u32);

impl MetaTypeId {
    /// The raw id value.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

/// Registration record for one type.
#[derive(Debug, Clone, Copy)]
pub struct MetaType {
    /// The type's id.
    pub id: MetaTypeId,
    /// The type's registered name.
    pub name: &'static str,
    type_id: TypeId,
}

#[derive(Default)]
struct MetaTypeRegistry {
    types: Vec<MetaType>,
    by_type: HashMap<TypeId, MetaTypeId>,
    by_name: HashMap<&'static str, MetaTypeId>,
}

impl MetaTypeRegistry {
    fn register(&mut self, type_id: TypeId, name: &'static str) -> MetaTypeId {
        if let Some(&id) = self.by_type.get(&type_id) {
            // An alias name still resolves to the first registration.
            self.by_name.entry(name).or_insert(id);
            return id;
        }
        let id = MetaTypeId(self.types.len() as u32 + 1);
        self.types.push(MetaType { id, name, type_id });
        self.by_type.insert(type_id, id);
        self.by_name.entry(name).or_insert(id);
        id
    }
}

static REGISTRY: OnceLock<RwLock<MetaTypeRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<MetaTypeRegistry> {
    REGISTRY.get_or_init(|| {
        let mut types = MetaTypeRegistry::default();
        macro_rules! builtin {
            ($($ty:ty),* $(,)?) => {
                $( types.register(TypeId::of::<$ty>(), stringify!($ty)); )*
            };
        }
        builtin!(
            (), bool, char, i8, i16, i32, i64, u8, u16, u32, u64, isize, usize, f32, f64,
            String, ObjectId,
        );
        types.register(TypeId::of::<Vec<u8>>(), "Vec<u8>");
        types.register(TypeId::of::<Vec<String>>(), "Vec<String>");
        RwLock::new(types)
    })
}

/// Register `T` under its Rust type name and return its id.
///
/// Registering an already known type returns the existing id.
pub fn register_meta_type<T: Any>() -> MetaTypeId {
    register_meta_type_named::<T>(std::any::type_name::<T>())
}

/// Register `T` under an explicit name, as used in descriptor parameter tags.
pub fn register_meta_type_named<T: Any>(name: &'static str) -> MetaTypeId {
    registry().write().register(TypeId::of::<T>(), name)
}

/// Id of `T`, if it has been registered.
pub fn meta_type_id<T: Any>() -> Option<MetaTypeId> {
    meta_type_id_of(TypeId::of::<T>())
}

fn meta_type_id_of(type_id: TypeId) -> Option<MetaTypeId> {
    registry().read().by_type.get(&type_id).copied()
}

/// Id of the type registered under `name`.
pub fn meta_type_by_name(name: &str) -> Option<MetaTypeId> {
    registry().read().by_name.get(name).copied()
}

/// Registration record for `id`.
pub fn meta_type(id: MetaTypeId) -> Option<MetaType> {
    let index = (id.0 as usize).checked_sub(1)?;
    registry().read().types.get(index).copied()
}

impl MetaType {
    /// Whether this record describes `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

type CopyFn = fn(&(dyn Any + Send + Sync)) -> Option<Box<dyn Any + Send + Sync>>;

fn copy_value<T: Clone + Send + Sync + 'static>(
    value: &(dyn Any + Send + Sync),
) -> Option<Box<dyn Any + Send + Sync>> {
    value
        .downcast_ref::<T>()
        .map(|v| Box::new(v.clone()) as Box<dyn Any + Send + Sync>)
}

/// An owned, type-erased value whose clone is a deep copy.
pub struct Value {
    inner: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
    copy: CopyFn,
}

impl Value {
    /// Wrap a value.
    pub fn new<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self {
            inner: Box::new(value),
            type_name: std::any::type_name::<T>(),
            copy: copy_value::<T>,
        }
    }

    /// Rust type name of the contained value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Meta type of the contained value, if registered.
    pub fn meta_type(&self) -> Option<MetaTypeId> {
        meta_type_id_of((*self.inner).type_id())
    }

    /// Whether the contained value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrow the contained value as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Take the contained value as `T`, or get the value back on mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let Self {
            inner,
            type_name,
            copy,
        } = self;
        inner.downcast::<T>().map(|value| *value).map_err(|inner| Self {
            inner,
            type_name,
            copy,
        })
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        let inner = (self.copy)(self.inner.as_ref())
            .unwrap_or_else(|| unreachable!("copy function always matches its own value"));
        Self {
            inner,
            type_name: self.type_name,
            copy: self.copy,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.type_name)
    }
}

/// Ordered signal arguments.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<Value>,
}

impl Arguments {
    /// An empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, builder style.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Append a value.
    pub fn push<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.values.push(Value::new(value));
    }

    /// Append an already erased value.
    pub fn push_value(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow argument `index` as `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index).and_then(|v| v.downcast_ref::<T>())
    }

    /// Borrow the erased argument at `index`.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Iterate over the erased arguments.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// A list holding the first `count` arguments.
    pub fn truncated(&self, count: usize) -> Self {
        Self {
            values: self.values.iter().take(count).cloned().collect(),
        }
    }

    /// Deep-copy the arguments for delivery on another thread.
    ///
    /// Fails with the offending type name if an argument type is not a
    /// registered meta type.
    pub fn deep_copy_for_queue(&self) -> Result<Self, &'static str> {
        if let Some(unregistered) = self.values.iter().find(|v| v.meta_type().is_none()) {
            return Err(unregistered.type_name());
        }
        Ok(self.clone())
    }
}

/// Conversion of a Rust value (usually a tuple) into signal arguments.
pub trait IntoArguments {
    /// Build the argument list.
    fn into_arguments(self) -> Arguments;
}

/// Conversion of signal arguments back into a Rust value.
pub trait FromArguments: Sized {
    /// Extract the value, or `None` if a type or arity does not match.
    fn from_arguments(args: &Arguments) -> Option<Self>;
}

impl IntoArguments for Arguments {
    fn into_arguments(self) -> Arguments {
        self
    }
}

impl IntoArguments for () {
    fn into_arguments(self) -> Arguments {
        Arguments::new()
    }
}

impl FromArguments for () {
    fn from_arguments(_args: &Arguments) -> Option<Self> {
        Some(())
    }
}

macro_rules! impl_tuple_arguments {
    ($($name:ident : $index:tt),+) => {
        impl<$($name: Clone + Send + Sync + 'static),+> IntoArguments for ($($name,)+) {
            fn into_arguments(self) -> Arguments {
                let mut args = Arguments::new();
                $( args.push(self.$index); )+
                args
            }
        }

        impl<$($name: Clone + Send + Sync + 'static),+> FromArguments for ($($name,)+) {
            fn from_arguments(args: &Arguments) -> Option<Self> {
                Some(($( args.get::<$name>($index)?.clone(), )+))
            }
        }
    };
}

impl_tuple_arguments!(A: 0);
impl_tuple_arguments!(A: 0, B: 1);
impl_tuple_arguments!(A: 0, B: 1, C: 2);
impl_tuple_arguments!(A: 0, B: 1, C: 2, D: 3);

static_assertions::assert_impl_all!(Value: Send, Sync);
static_assertions::assert_impl_all!(Arguments: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Unregistered(u8);

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_builtin_types_registered() {
        assert!(meta_type_id::<i32>().is_some());
        assert!(meta_type_id::<String>().is_some());
        assert!(meta_type_id::<ObjectId>().is_some());
        assert_eq!(meta_type_by_name("i32"), meta_type_id::<i32>());
        assert_eq!(meta_type_by_name("ObjectId"), meta_type_id::<ObjectId>());
    }

    #[test]
    fn test_register_is_idempotent() {
        let first = register_meta_type::<Point>();
        let second = register_meta_type_named::<Point>("Point");
        assert_eq!(first, second);
        assert_eq!(meta_type_by_name("Point"), Some(first));
        let record = meta_type(first).unwrap();
        assert!(record.is::<Point>());
    }

    #[test]
    fn test_value_clone_is_deep() {
        let original = Value::new(vec![1u32, 2, 3]);
        let copy = original.clone();
        let a = original.downcast_ref::<Vec<u32>>().unwrap();
        let b = copy.downcast_ref::<Vec<u32>>().unwrap();
        assert_eq!(a, b);
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_value_downcast() {
        let value = Value::new(String::from("hello"));
        assert!(value.is::<String>());
        let value = value.downcast::<i32>().unwrap_err();
        assert_eq!(value.downcast::<String>().unwrap(), "hello");
    }

    #[test]
    fn test_queue_copy_requires_registration() {
        let args = Arguments::new().with(5i32).with(Unregistered(1));
        let err = args.deep_copy_for_queue().unwrap_err();
        assert!(err.contains("Unregistered"));

        let args = Arguments::new().with(5i32).with(String::from("x"));
        let copy = args.deep_copy_for_queue().unwrap();
        assert_eq!(copy.get::<i32>(0), Some(&5));
        assert_eq!(copy.get::<String>(1).map(String::as_str), Some("x"));
    }

    #[test]
    fn test_tuple_round_trip() {
        let args = (7i32, String::from("seven"), true).into_arguments();
        assert_eq!(args.len(), 3);
        let (n, s, b) = <(i32, String, bool)>::from_arguments(&args).unwrap();
        assert_eq!((n, s.as_str(), b), (7, "seven", true));
        assert!(<(String,)>::from_arguments(&args).is_none());
    }

    #[test]
    fn test_truncated() {
        let args = (1i32, 2i32, 3i32).into_arguments();
        let first_two = args.truncated(2);
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two.get::<i32>(1), Some(&2));
    }
}
