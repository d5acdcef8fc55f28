use std::io::{Read, Write};

use serde_json::Value as Json;

use crate::{
    descriptor::DataDescriptor,
    format::{object_format, FormatError},
    value::Value,
};

/// Returns the process-wide JSON format.
pub fn json_format() -> &'static JsonFormat {
    static FORMAT: JsonFormat = JsonFormat { _priv: () };
    &FORMAT
}

/// Serializes pdef values to and from JSON strings and streams.
///
/// A thin wrapper over the object format: datetimes are already rendered
/// with the fixed pattern and sets as arrays in the object tree, so the JSON
/// layer is plain serde_json with no ASCII escaping.
pub struct JsonFormat {
    _priv: (),
}

impl JsonFormat {
    pub fn write(&self, value: &Value, descriptor: &DataDescriptor) -> Result<String, FormatError> {
        let object = object_format().write(value, descriptor)?;
        Ok(serde_json::to_string(&object)?)
    }

    pub fn write_pretty(
        &self,
        value: &Value,
        descriptor: &DataDescriptor,
    ) -> Result<String, FormatError> {
        let object = object_format().write(value, descriptor)?;
        Ok(serde_json::to_string_pretty(&object)?)
    }

    /// Serializes a value as JSON to a byte stream.
    pub fn write_to<W: Write>(
        &self,
        writer: W,
        value: &Value,
        descriptor: &DataDescriptor,
    ) -> Result<(), FormatError> {
        let object = object_format().write(value, descriptor)?;
        Ok(serde_json::to_writer(writer, &object)?)
    }

    /// Parses a value from a JSON string. A literal `null` parses as
    /// [`Value::Null`].
    pub fn read(&self, s: &str, descriptor: &DataDescriptor) -> Result<Value, FormatError> {
        let object: Json = serde_json::from_str(s)?;
        object_format().read(&object, descriptor)
    }

    /// Parses a value from a JSON byte stream.
    pub fn read_from<R: Read>(
        &self,
        reader: R,
        descriptor: &DataDescriptor,
    ) -> Result<Value, FormatError> {
        let object: Json = serde_json::from_reader(reader)?;
        object_format().read(&object, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_are_not_ascii_escaped() {
        let s = json_format()
            .write(&Value::String("привет".into()), &DataDescriptor::String)
            .unwrap();
        assert_eq!(s, "\"привет\"");
    }

    #[test]
    fn null_reads_as_none() {
        let value = json_format().read("null", &DataDescriptor::Int32).unwrap();
        assert_eq!(value, Value::Null);

        let s = json_format()
            .write(&Value::Null, &DataDescriptor::Int32)
            .unwrap();
        assert_eq!(s, "null");
    }

    #[test]
    fn streams() {
        let mut buffer = Vec::new();
        json_format()
            .write_to(&mut buffer, &Value::I32(123), &DataDescriptor::Int32)
            .unwrap();
        assert_eq!(buffer, b"123");

        let value = json_format()
            .read_from(&buffer[..], &DataDescriptor::Int32)
            .unwrap();
        assert_eq!(value, Value::I32(123));
    }

    #[test]
    fn void_serializes_as_null() {
        let s = json_format()
            .write(&Value::Null, &DataDescriptor::Void)
            .unwrap();
        assert_eq!(s, "null");
    }
}
