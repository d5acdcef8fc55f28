//! Data formats: the object codec and its JSON wrapper.
//!
//! [`ObjectFormat`] converts between typed [`Value`]s and a JSON-compatible
//! object tree ([`serde_json::Value`]), driven by descriptors. [`JsonFormat`]
//! serializes that tree to strings and streams.
//!
//! Both formats are stateless; the [`object_format`] and [`json_format`]
//! singletons are safe to use from multiple threads.

mod json;

pub use self::json::{json_format, JsonFormat};

use chrono::NaiveDateTime;
use serde_json::Value as Json;
use thiserror::Error;

use crate::{
    descriptor::{DataDescriptor, MessageDescriptor},
    message::DynamicMessage,
    value::Value,
    Type,
};

/// The fixed datetime pattern: UTC, seconds precision.
pub const SIMPLE_ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

/// An error raised by the data codecs on unsupported or mismatched values.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
    #[error("malformed datetime {0:?}, expected YYYY-MM-DDTHH:MM:SSZ")]
    MalformedDatetime(String),
    #[error("number out of range for {ty}: {value}")]
    OutOfRange { ty: Type, value: i64 },
    #[error("non-finite number is not serializable")]
    NonFiniteNumber,
    #[error("unsupported map key type {0}")]
    UnsupportedMapKey(Type),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FormatError {
    pub(crate) fn mismatch(expected: impl Into<String>, actual: impl ToString) -> Self {
        FormatError::Mismatch {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }
}

/// Returns the process-wide object format.
pub fn object_format() -> &'static ObjectFormat {
    static FORMAT: ObjectFormat = ObjectFormat { _priv: () };
    &FORMAT
}

/// Converts pdef values to and from JSON-compatible object trees.
pub struct ObjectFormat {
    _priv: (),
}

impl ObjectFormat {
    /// Serializes a value into an object tree.
    ///
    /// Nulls stay null at any level. Enum values are lowercased, datetimes
    /// formatted with [`SIMPLE_ISO8601`], sets become arrays, and message
    /// fields which are unset are omitted. The discriminator of a
    /// polymorphic message is encoded like any other field, from the
    /// message's own descriptor.
    pub fn write(&self, value: &Value, descriptor: &DataDescriptor) -> Result<Json, FormatError> {
        if value.is_null() {
            return Ok(Json::Null);
        }

        match descriptor {
            DataDescriptor::Bool => value
                .as_bool()
                .map(Json::Bool)
                .ok_or_else(|| FormatError::mismatch("bool", value_name(value))),
            DataDescriptor::Int16 => self.write_int(value, Type::Int16),
            DataDescriptor::Int32 => self.write_int(value, Type::Int32),
            DataDescriptor::Int64 => self.write_int(value, Type::Int64),
            DataDescriptor::Float | DataDescriptor::Double => {
                let number = value
                    .as_f64()
                    .ok_or_else(|| FormatError::mismatch("number", value_name(value)))?;
                serde_json::Number::from_f64(number)
                    .map(Json::Number)
                    .ok_or(FormatError::NonFiniteNumber)
            }
            DataDescriptor::String => value
                .as_str()
                .map(|s| Json::String(s.to_owned()))
                .ok_or_else(|| FormatError::mismatch("string", value_name(value))),
            DataDescriptor::Datetime => value
                .as_datetime()
                .map(|dt| Json::String(dt.format(SIMPLE_ISO8601).to_string()))
                .ok_or_else(|| FormatError::mismatch("datetime", value_name(value))),
            DataDescriptor::Void => Ok(Json::Null),
            DataDescriptor::Enum(_) => {
                let name = value
                    .as_enum()
                    .or_else(|| value.as_str())
                    .ok_or_else(|| FormatError::mismatch("enum value", value_name(value)))?;
                Ok(Json::String(name.to_lowercase()))
            }
            DataDescriptor::List(list) => match value {
                Value::List(elements) => self.write_elements(elements.iter(), list.element()),
                _ => Err(FormatError::mismatch("list", value_name(value))),
            },
            DataDescriptor::Set(set) => match value {
                Value::Set(elements) => self.write_elements(elements.iter(), set.element()),
                Value::List(elements) => self.write_elements(elements.iter(), set.element()),
                _ => Err(FormatError::mismatch("set", value_name(value))),
            },
            DataDescriptor::Map(map) => match value {
                Value::Map(entries) => {
                    let mut object = serde_json::Map::with_capacity(entries.len());
                    for (key, entry) in entries {
                        let key = self.write_map_key(key, map.key())?;
                        object.insert(key, self.write(entry, map.value())?);
                    }
                    Ok(Json::Object(object))
                }
                _ => Err(FormatError::mismatch("map", value_name(value))),
            },
            DataDescriptor::Message(_) => match value {
                Value::Message(message) => self.write_message(message),
                _ => Err(FormatError::mismatch("message", value_name(value))),
            },
        }
    }

    fn write_elements<'a>(
        &self,
        elements: impl Iterator<Item = &'a Value>,
        descriptor: &DataDescriptor,
    ) -> Result<Json, FormatError> {
        elements
            .map(|element| self.write(element, descriptor))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array)
    }

    fn write_int(&self, value: &Value, ty: Type) -> Result<Json, FormatError> {
        let number = match value.as_i64() {
            Some(number) => number,
            None => value
                .as_f64()
                .ok_or_else(|| FormatError::mismatch(ty.as_str(), value_name(value)))?
                as i64,
        };
        check_int_range(number, ty)?;
        Ok(Json::Number(number.into()))
    }

    // JSON object keys are strings; primitive keys render via their JSON
    // token.
    fn write_map_key(
        &self,
        key: &Value,
        descriptor: &DataDescriptor,
    ) -> Result<String, FormatError> {
        match self.write(key, descriptor)? {
            Json::String(s) => Ok(s),
            Json::Bool(b) => Ok(b.to_string()),
            Json::Number(n) => Ok(n.to_string()),
            Json::Null => Err(FormatError::mismatch("non-null map key", "null")),
            _ => Err(FormatError::UnsupportedMapKey(descriptor.ty())),
        }
    }

    fn write_message(&self, message: &DynamicMessage) -> Result<Json, FormatError> {
        // The message's own descriptor drives encoding, which is what makes
        // writing a subtype through its base descriptor work.
        let descriptor = message.descriptor();
        let mut object = serde_json::Map::new();

        for field in descriptor.fields() {
            if let Some(value) = message.get(field.name()) {
                object.insert(field.name().to_owned(), self.write(value, field.ty())?);
            }
        }

        Ok(Json::Object(object))
    }

    /// Parses a value from an object tree.
    ///
    /// Null input parses as [`Value::Null`] for any descriptor. Enum values
    /// match case-insensitively; unknown enum values parse as null. For
    /// polymorphic messages the discriminator field is read first and the
    /// subtype descriptor instantiated; a missing or unknown discriminator
    /// falls back to the declaring descriptor. Unknown message fields are
    /// ignored.
    pub fn read(&self, object: &Json, descriptor: &DataDescriptor) -> Result<Value, FormatError> {
        if object.is_null() {
            return Ok(Value::Null);
        }

        match descriptor {
            DataDescriptor::Bool => object
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| FormatError::mismatch("bool", object)),
            DataDescriptor::Int16 => Ok(Value::I16(self.read_int(object, Type::Int16)? as i16)),
            DataDescriptor::Int32 => Ok(Value::I32(self.read_int(object, Type::Int32)? as i32)),
            DataDescriptor::Int64 => Ok(Value::I64(self.read_int(object, Type::Int64)?)),
            DataDescriptor::Float => object
                .as_f64()
                .map(|number| Value::F32(number as f32))
                .ok_or_else(|| FormatError::mismatch("number", object)),
            DataDescriptor::Double => object
                .as_f64()
                .map(Value::F64)
                .ok_or_else(|| FormatError::mismatch("number", object)),
            DataDescriptor::String => object
                .as_str()
                .map(|s| Value::String(s.to_owned()))
                .ok_or_else(|| FormatError::mismatch("string", object)),
            DataDescriptor::Datetime => {
                let s = object
                    .as_str()
                    .ok_or_else(|| FormatError::mismatch("datetime string", object))?;
                self.read_datetime(s)
            }
            DataDescriptor::Void => Ok(Value::Null),
            DataDescriptor::Enum(enum0) => {
                let s = object
                    .as_str()
                    .ok_or_else(|| FormatError::mismatch("enum string", object))?;
                Ok(enum0
                    .find_value(s)
                    .map(|canonical| Value::Enum(canonical.to_owned()))
                    .unwrap_or(Value::Null))
            }
            DataDescriptor::List(list) => {
                let elements = object
                    .as_array()
                    .ok_or_else(|| FormatError::mismatch("array", object))?;
                elements
                    .iter()
                    .map(|element| self.read(element, list.element()))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            DataDescriptor::Set(set) => {
                let elements = object
                    .as_array()
                    .ok_or_else(|| FormatError::mismatch("array", object))?;
                elements
                    .iter()
                    .map(|element| self.read(element, set.element()))
                    .collect::<Result<_, _>>()
                    .map(Value::Set)
            }
            DataDescriptor::Map(map) => {
                let entries = object
                    .as_object()
                    .ok_or_else(|| FormatError::mismatch("object", object))?;
                let mut result = std::collections::BTreeMap::new();
                for (key, entry) in entries {
                    let key = self.read_map_key(key, map.key())?;
                    result.insert(key, self.read(entry, map.value())?);
                }
                Ok(Value::Map(result))
            }
            DataDescriptor::Message(message) => self.read_message(object, message),
        }
    }

    fn read_int(&self, object: &Json, ty: Type) -> Result<i64, FormatError> {
        let number = match object.as_i64() {
            Some(number) => number,
            None => object
                .as_f64()
                .ok_or_else(|| FormatError::mismatch(ty.as_str(), object))?
                as i64,
        };
        check_int_range(number, ty)?;
        Ok(number)
    }

    fn read_datetime(&self, s: &str) -> Result<Value, FormatError> {
        NaiveDateTime::parse_from_str(s, SIMPLE_ISO8601)
            .map(|naive| Value::Datetime(naive.and_utc()))
            .map_err(|_| FormatError::MalformedDatetime(s.to_owned()))
    }

    fn read_map_key(&self, key: &str, descriptor: &DataDescriptor) -> Result<Value, FormatError> {
        match descriptor {
            DataDescriptor::String => Ok(Value::String(key.to_owned())),
            DataDescriptor::Bool => match key {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(FormatError::mismatch("bool key", key)),
            },
            DataDescriptor::Int16 | DataDescriptor::Int32 | DataDescriptor::Int64 => {
                let number: i64 = key
                    .parse()
                    .map_err(|_| FormatError::mismatch("integer key", key))?;
                check_int_range(number, descriptor.ty())?;
                Ok(match descriptor {
                    DataDescriptor::Int16 => Value::I16(number as i16),
                    DataDescriptor::Int32 => Value::I32(number as i32),
                    _ => Value::I64(number),
                })
            }
            DataDescriptor::Float => key
                .parse()
                .map(Value::F32)
                .map_err(|_| FormatError::mismatch("number key", key)),
            DataDescriptor::Double => key
                .parse()
                .map(Value::F64)
                .map_err(|_| FormatError::mismatch("number key", key)),
            DataDescriptor::Enum(enum0) => enum0
                .find_value(key)
                .map(|canonical| Value::Enum(canonical.to_owned()))
                .ok_or_else(|| FormatError::mismatch("enum key", key)),
            DataDescriptor::Datetime => self.read_datetime(key),
            _ => Err(FormatError::UnsupportedMapKey(descriptor.ty())),
        }
    }

    fn read_message(
        &self,
        object: &Json,
        descriptor: &MessageDescriptor,
    ) -> Result<Value, FormatError> {
        let entries = object
            .as_object()
            .ok_or_else(|| FormatError::mismatch("object", object))?;

        let mut target = descriptor;
        if let Some(discriminator) = descriptor.discriminator() {
            let parsed = match entries.get(discriminator.name()) {
                Some(raw) if !raw.is_null() => self
                    .read(raw, discriminator.ty())?
                    .as_enum()
                    .map(str::to_owned),
                _ => None,
            };
            target = descriptor.find_subtype(parsed.as_deref());
        }

        let mut message = DynamicMessage::new(target);
        for field in target.fields() {
            let raw = match entries.get(field.name()) {
                Some(raw) if !raw.is_null() => raw,
                // Absent and null input fields stay unset.
                _ => continue,
            };

            let value = self.read(raw, field.ty())?;
            if !value.is_null() {
                message.set(field.name(), value);
            }
        }

        Ok(Value::Message(message))
    }
}

fn check_int_range(number: i64, ty: Type) -> Result<(), FormatError> {
    let ok = match ty {
        Type::Int16 => i16::try_from(number).is_ok(),
        Type::Int32 => i32::try_from(number).is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(FormatError::OutOfRange { ty, value: number })
    }
}

fn value_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::I16(_) | Value::I32(_) | Value::I64(_) => "integer",
        Value::F32(_) | Value::F64(_) => "number",
        Value::String(_) => "string",
        Value::Datetime(_) => "datetime",
        Value::Enum(_) => "enum value",
        Value::List(_) => "list",
        Value::Set(_) => "set",
        Value::Map(_) => "map",
        Value::Message(_) => "message",
    }
}
