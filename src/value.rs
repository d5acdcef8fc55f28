//! Dynamic values for pdef data types.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use chrono::{DateTime, Utc};

use crate::{descriptor::DataDescriptor, message::DynamicMessage};

/// A dynamically typed pdef value.
///
/// Values are owned trees: cloning one is a deep copy, which is what gives
/// invocations and messages their isolation guarantees. `Null` models an
/// absent value of any type.
///
/// The total ordering (floats compare via [`f64::total_cmp`]) exists so that
/// sets and maps of arbitrary data values have deterministic storage; it is
/// not a semantic ordering across variants.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Datetime(DateTime<Utc>),
    /// A canonical uppercase enum value name.
    Enum(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    Map(BTreeMap<Value, Value>),
    Message(DynamicMessage),
}

impl Value {
    /// The typed default for a descriptor: `""` for strings, `0` for
    /// numbers, `false` for bools, an empty container for list/set/map, a
    /// fresh zero-valued instance for messages, and `Null` for void,
    /// datetime and enum types.
    pub fn default_of(descriptor: &DataDescriptor) -> Value {
        match descriptor {
            DataDescriptor::Bool => Value::Bool(false),
            DataDescriptor::Int16 => Value::I16(0),
            DataDescriptor::Int32 => Value::I32(0),
            DataDescriptor::Int64 => Value::I64(0),
            DataDescriptor::Float => Value::F32(0.0),
            DataDescriptor::Double => Value::F64(0.0),
            DataDescriptor::String => Value::String(String::new()),
            DataDescriptor::Datetime | DataDescriptor::Void | DataDescriptor::Enum(_) => {
                Value::Null
            }
            DataDescriptor::List(_) => Value::List(Vec::new()),
            DataDescriptor::Set(_) => Value::Set(BTreeSet::new()),
            DataDescriptor::Map(_) => Value::Map(BTreeMap::new()),
            DataDescriptor::Message(message) => Value::Message(message.new_instance()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns an integer value widened or narrowed to `i32`, `None` for
    /// non-integers.
    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().map(|value| value as i32)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I16(value) => Some(i64::from(*value)),
            Value::I32(value) => Some(i64::from(*value)),
            Value::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(value) => Some(f64::from(*value)),
            Value::F64(value) => Some(*value),
            Value::I16(value) => Some(f64::from(*value)),
            Value::I32(value) => Some(f64::from(*value)),
            Value::I64(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&str> {
        match self {
            Value::Enum(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Datetime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_message(self) -> Option<DynamicMessage> {
        match self {
            Value::Message(value) => Some(value),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I16(_) => 2,
            Value::I32(_) => 3,
            Value::I64(_) => 4,
            Value::F32(_) => 5,
            Value::F64(_) => 6,
            Value::String(_) => 7,
            Value::Datetime(_) => 8,
            Value::Enum(_) => 9,
            Value::List(_) => 10,
            Value::Set(_) => 11,
            Value::Map(_) => 12,
            Value::Message(_) => 13,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Datetime(a), Value::Datetime(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Message(a), Value::Message(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Value::I16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::I32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::I64(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::F32(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::F64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Datetime(value)
    }
}

impl From<DynamicMessage> for Value {
    fn from(value: DynamicMessage) -> Self {
        Value::Message(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_have_a_total_order() {
        let mut set = BTreeSet::new();
        set.insert(Value::F64(2.5));
        set.insert(Value::F64(-1.5));
        set.insert(Value::F64(2.5));

        assert_eq!(set.len(), 2);
        assert_eq!(set.iter().next(), Some(&Value::F64(-1.5)));
        assert_eq!(Value::F64(f64::NAN), Value::F64(f64::NAN));
    }

    #[test]
    fn set_equality_ignores_insertion_order() {
        let a: BTreeSet<Value> = [Value::I32(1), Value::I32(2)].into_iter().collect();
        let b: BTreeSet<Value> = [Value::I32(2), Value::I32(1)].into_iter().collect();

        assert_eq!(Value::Set(a), Value::Set(b));
    }

    #[test]
    fn typed_defaults() {
        assert_eq!(
            Value::default_of(&DataDescriptor::String),
            Value::String(String::new())
        );
        assert_eq!(Value::default_of(&DataDescriptor::Int32), Value::I32(0));
        assert_eq!(
            Value::default_of(&DataDescriptor::Bool),
            Value::Bool(false)
        );
        assert_eq!(Value::default_of(&DataDescriptor::Void), Value::Null);
        assert_eq!(
            Value::default_of(&DataDescriptor::list(DataDescriptor::Int32)),
            Value::List(Vec::new())
        );
    }

    #[test]
    fn numeric_accessors_widen() {
        assert_eq!(Value::I16(7).as_i64(), Some(7));
        assert_eq!(Value::I64(7).as_i32(), Some(7));
        assert_eq!(Value::I32(7).as_f64(), Some(7.0));
        assert_eq!(Value::String("7".into()).as_i64(), None);
    }
}
