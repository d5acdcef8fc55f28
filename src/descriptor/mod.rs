//! Reflective descriptors for pdef types.
//!
//! Descriptors are the runtime handles generated code binds its definitions
//! to. They drive the data codecs and the RPC protocol. Every handle is a
//! wrapper around an [`Arc`], so cloning is cheap and descriptors can be
//! shared freely between threads.
//!
//! Type graphs are cyclic: a message can contain itself, subtypes point back
//! at their base, interfaces return themselves. All edges which may
//! participate in a cycle are expressed as [`Thunk`]s, which resolve on first
//! use and memoize the result.

mod service;

pub use self::service::{
    ArgDescriptor, InterfaceDescriptor, InterfaceDescriptorBuilder, MethodDescriptor,
    MethodDescriptorBuilder, MethodResult,
};

use std::{collections::BTreeMap, fmt, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{message::DynamicMessage, Type};

/// A lazily resolved, memoized reference to a descriptor.
///
/// A thunk is either an immediate value (`Thunk::from(descriptor)`) or a
/// deferred supplier (`Thunk::new(|| ...)`). Suppliers run at most once, on
/// first access, which is what makes cyclic descriptor graphs constructible:
/// generated code refers to other definitions through closures over their
/// lazy statics instead of requiring them to exist up front.
pub struct Thunk<T> {
    cell: OnceCell<T>,
    supplier: Option<Box<dyn Fn() -> T + Send + Sync>>,
}

impl<T> Thunk<T> {
    /// Creates a deferred thunk. The supplier is invoked on the first call to
    /// [`Thunk::get`] and never again.
    pub fn new(supplier: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Thunk {
            cell: OnceCell::new(),
            supplier: Some(Box::new(supplier)),
        }
    }

    /// Resolves the thunk, running the supplier if the value is not cached
    /// yet.
    pub fn get(&self) -> &T {
        self.cell.get_or_init(|| match &self.supplier {
            Some(supplier) => supplier(),
            // Constructors guarantee a value or a supplier is present.
            None => unreachable!("thunk has neither a value nor a supplier"),
        })
    }
}

impl<T> From<T> for Thunk<T> {
    fn from(value: T) -> Self {
        Thunk {
            cell: OnceCell::with_value(value),
            supplier: None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Thunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("Thunk").field(value).finish(),
            None => f.write_str("Thunk(<unresolved>)"),
        }
    }
}

/// A descriptor for any pdef data type.
///
/// Primitive variants carry no state; container, enum and message variants
/// wrap their dedicated descriptor handles.
#[derive(Clone)]
pub enum DataDescriptor {
    Bool,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Datetime,
    Void,
    List(ListDescriptor),
    Set(SetDescriptor),
    Map(MapDescriptor),
    Enum(EnumDescriptor),
    Message(MessageDescriptor),
}

impl DataDescriptor {
    pub fn ty(&self) -> Type {
        match self {
            DataDescriptor::Bool => Type::Bool,
            DataDescriptor::Int16 => Type::Int16,
            DataDescriptor::Int32 => Type::Int32,
            DataDescriptor::Int64 => Type::Int64,
            DataDescriptor::Float => Type::Float,
            DataDescriptor::Double => Type::Double,
            DataDescriptor::String => Type::String,
            DataDescriptor::Datetime => Type::Datetime,
            DataDescriptor::Void => Type::Void,
            DataDescriptor::List(_) => Type::List,
            DataDescriptor::Set(_) => Type::Set,
            DataDescriptor::Map(_) => Type::Map,
            DataDescriptor::Enum(_) => Type::Enum,
            DataDescriptor::Message(_) => Type::Message,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.ty().is_primitive()
    }

    pub fn is_message(&self) -> bool {
        matches!(self, DataDescriptor::Message(_))
    }

    pub fn as_message(&self) -> Option<&MessageDescriptor> {
        match self {
            DataDescriptor::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDescriptor> {
        match self {
            DataDescriptor::Enum(enum0) => Some(enum0),
            _ => None,
        }
    }

    /// Creates a list descriptor with an element descriptor.
    pub fn list(element: impl Into<Thunk<DataDescriptor>>) -> Self {
        DataDescriptor::List(ListDescriptor::new(element))
    }

    /// Creates a set descriptor with an element descriptor.
    pub fn set(element: impl Into<Thunk<DataDescriptor>>) -> Self {
        DataDescriptor::Set(SetDescriptor::new(element))
    }

    /// Creates a map descriptor with key/value descriptors.
    pub fn map(
        key: impl Into<Thunk<DataDescriptor>>,
        value: impl Into<Thunk<DataDescriptor>>,
    ) -> Self {
        DataDescriptor::Map(MapDescriptor::new(key, value))
    }
}

impl PartialEq for DataDescriptor {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DataDescriptor::List(a), DataDescriptor::List(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (DataDescriptor::Set(a), DataDescriptor::Set(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (DataDescriptor::Map(a), DataDescriptor::Map(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (DataDescriptor::Enum(a), DataDescriptor::Enum(b)) => a == b,
            (DataDescriptor::Message(a), DataDescriptor::Message(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for DataDescriptor {}

impl fmt::Display for DataDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataDescriptor::List(list) => write!(f, "list<{}>", list.element()),
            DataDescriptor::Set(set) => write!(f, "set<{}>", set.element()),
            DataDescriptor::Map(map) => write!(f, "map<{}, {}>", map.key(), map.value()),
            DataDescriptor::Enum(enum0) => f.write_str(enum0.name()),
            DataDescriptor::Message(message) => f.write_str(message.name()),
            other => f.write_str(other.ty().as_str()),
        }
    }
}

impl fmt::Debug for DataDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataDescriptor({self})")
    }
}

/// A list descriptor with an element descriptor.
#[derive(Clone)]
pub struct ListDescriptor {
    inner: Arc<ListInner>,
}

struct ListInner {
    element: Thunk<DataDescriptor>,
}

impl ListDescriptor {
    pub fn new(element: impl Into<Thunk<DataDescriptor>>) -> Self {
        ListDescriptor {
            inner: Arc::new(ListInner {
                element: element.into(),
            }),
        }
    }

    pub fn element(&self) -> &DataDescriptor {
        self.inner.element.get()
    }
}

/// A set descriptor with an element descriptor.
#[derive(Clone)]
pub struct SetDescriptor {
    inner: Arc<SetInner>,
}

struct SetInner {
    element: Thunk<DataDescriptor>,
}

impl SetDescriptor {
    pub fn new(element: impl Into<Thunk<DataDescriptor>>) -> Self {
        SetDescriptor {
            inner: Arc::new(SetInner {
                element: element.into(),
            }),
        }
    }

    pub fn element(&self) -> &DataDescriptor {
        self.inner.element.get()
    }
}

/// A map descriptor with key and value descriptors.
#[derive(Clone)]
pub struct MapDescriptor {
    inner: Arc<MapInner>,
}

struct MapInner {
    key: Thunk<DataDescriptor>,
    value: Thunk<DataDescriptor>,
}

impl MapDescriptor {
    pub fn new(
        key: impl Into<Thunk<DataDescriptor>>,
        value: impl Into<Thunk<DataDescriptor>>,
    ) -> Self {
        MapDescriptor {
            inner: Arc::new(MapInner {
                key: key.into(),
                value: value.into(),
            }),
        }
    }

    pub fn key(&self) -> &DataDescriptor {
        self.inner.key.get()
    }

    pub fn value(&self) -> &DataDescriptor {
        self.inner.value.get()
    }
}

/// An enum descriptor: an ordered set of uppercase value names.
#[derive(Clone)]
pub struct EnumDescriptor {
    inner: Arc<EnumInner>,
}

struct EnumInner {
    name: String,
    values: Vec<String>,
}

impl EnumDescriptor {
    pub fn new<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        EnumDescriptor {
            inner: Arc::new(EnumInner {
                name: name.into(),
                values: values
                    .into_iter()
                    .map(|v| v.as_ref().to_uppercase())
                    .collect(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The value names in declaration order, canonicalized to uppercase.
    pub fn values(&self) -> &[String] {
        &self.inner.values
    }

    /// Finds a value by a case-insensitive name, returns the canonical
    /// uppercase name or `None`.
    pub fn find_value(&self, name: &str) -> Option<&str> {
        let name = name.to_uppercase();
        self.inner
            .values
            .iter()
            .find(|v| **v == name)
            .map(|v| v.as_str())
    }
}

impl PartialEq for EnumDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for EnumDescriptor {}

impl fmt::Debug for EnumDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumDescriptor")
            .field("name", &self.inner.name)
            .field("values", &self.inner.values)
            .finish()
    }
}

/// A message descriptor.
///
/// Messages support single inheritance and polymorphism: a base message may
/// declare a discriminator field (always enum-typed) and enumerate its
/// subtypes, each of which carries a unique discriminator value. Subtype
/// references are thunks resolved and indexed on first use.
#[derive(Clone)]
pub struct MessageDescriptor {
    inner: Arc<MessageInner>,
}

struct MessageInner {
    name: String,
    base: Option<Thunk<MessageDescriptor>>,
    discriminator_value: Option<String>,
    declared_fields: Vec<FieldDescriptor>,
    subtype_thunks: Vec<Thunk<MessageDescriptor>>,

    fields: OnceCell<Vec<FieldDescriptor>>,
    subtypes: OnceCell<Vec<MessageDescriptor>>,
    subtype_index: OnceCell<BTreeMap<String, MessageDescriptor>>,
}

impl MessageDescriptor {
    pub fn builder(name: impl Into<String>) -> MessageDescriptorBuilder {
        MessageDescriptorBuilder {
            name: name.into(),
            base: None,
            discriminator_value: None,
            fields: Vec::new(),
            subtypes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn base(&self) -> Option<&MessageDescriptor> {
        self.inner.base.as_ref().map(Thunk::get)
    }

    /// The enum value identifying this subtype in a polymorphic tree, absent
    /// on the root.
    pub fn discriminator_value(&self) -> Option<&str> {
        self.inner.discriminator_value.as_deref()
    }

    pub fn declared_fields(&self) -> &[FieldDescriptor] {
        &self.inner.declared_fields
    }

    /// All fields, inherited first, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.inner.fields.get_or_init(|| {
            let mut fields = match self.base() {
                Some(base) => base.fields().to_vec(),
                None => Vec::new(),
            };
            fields.extend(self.inner.declared_fields.iter().cloned());
            fields
        })
    }

    /// Returns a field by its name or `None`.
    pub fn find_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|field| field.name() == name)
    }

    /// The discriminator field of the polymorphic tree this message belongs
    /// to, if any. Declared in the root and inherited by every subtype.
    pub fn discriminator(&self) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|field| field.is_discriminator())
    }

    pub fn is_polymorphic(&self) -> bool {
        self.discriminator().is_some()
    }

    /// Resolves and returns the declared subtypes. The thunks run on the
    /// first call only.
    pub fn subtypes(&self) -> &[MessageDescriptor] {
        self.inner.subtypes.get_or_init(|| {
            self.inner
                .subtype_thunks
                .iter()
                .map(|thunk| thunk.get().clone())
                .collect()
        })
    }

    /// Returns the subtype with the given discriminator value, or `self`
    /// when the value is absent or unknown.
    pub fn find_subtype(&self, value: Option<&str>) -> &MessageDescriptor {
        let index = self.inner.subtype_index.get_or_init(|| {
            self.subtypes()
                .iter()
                .filter_map(|subtype| {
                    subtype
                        .discriminator_value()
                        .map(|value| (value.to_owned(), subtype.clone()))
                })
                .collect()
        });

        value.and_then(|value| index.get(value)).unwrap_or(self)
    }

    /// Returns `true` when this descriptor is `other` or inherits from it.
    pub fn extends(&self, other: &MessageDescriptor) -> bool {
        let mut current = Some(self);
        while let Some(descriptor) = current {
            if descriptor == other {
                return true;
            }
            current = descriptor.base();
        }
        false
    }

    /// Creates an empty message instance bound to this descriptor. In a
    /// polymorphic subtype the discriminator field is pre-set to the
    /// subtype's discriminator value.
    pub fn new_instance(&self) -> DynamicMessage {
        DynamicMessage::new(self)
    }

    /// Identity of the shared inner, used to order messages of distinct
    /// descriptors deterministically within a process.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MessageDescriptor {}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MessageDescriptor`], the shape generated code constructs
/// message descriptors with.
pub struct MessageDescriptorBuilder {
    name: String,
    base: Option<Thunk<MessageDescriptor>>,
    discriminator_value: Option<String>,
    fields: Vec<FieldDescriptor>,
    subtypes: Vec<Thunk<MessageDescriptor>>,
}

impl MessageDescriptorBuilder {
    pub fn base(mut self, base: impl Into<Thunk<MessageDescriptor>>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.discriminator_value = Some(value.into().to_uppercase());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn subtype(mut self, subtype: impl Into<Thunk<MessageDescriptor>>) -> Self {
        self.subtypes.push(subtype.into());
        self
    }

    pub fn build(self) -> MessageDescriptor {
        MessageDescriptor {
            inner: Arc::new(MessageInner {
                name: self.name,
                base: self.base,
                discriminator_value: self.discriminator_value,
                declared_fields: self.fields,
                subtype_thunks: self.subtypes,
                fields: OnceCell::new(),
                subtypes: OnceCell::new(),
                subtype_index: OnceCell::new(),
            }),
        }
    }
}

/// A message field descriptor.
#[derive(Clone)]
pub struct FieldDescriptor {
    inner: Arc<FieldInner>,
}

struct FieldInner {
    name: String,
    ty: Thunk<DataDescriptor>,
    is_discriminator: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, ty: impl Into<Thunk<DataDescriptor>>) -> Self {
        FieldDescriptor {
            inner: Arc::new(FieldInner {
                name: name.into(),
                ty: ty.into(),
                is_discriminator: false,
            }),
        }
    }

    /// Creates a discriminator field; its type must be an enum.
    pub fn discriminator(name: impl Into<String>, ty: impl Into<Thunk<DataDescriptor>>) -> Self {
        FieldDescriptor {
            inner: Arc::new(FieldInner {
                name: name.into(),
                ty: ty.into(),
                is_discriminator: true,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ty(&self) -> &DataDescriptor {
        self.inner.ty.get()
    }

    pub fn is_discriminator(&self) -> bool {
        self.inner.is_discriminator
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for FieldDescriptor {}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.inner.name)
            .field("is_discriminator", &self.inner.is_discriminator)
            .finish_non_exhaustive()
    }
}
