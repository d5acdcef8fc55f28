//! Dynamic messages bound to message descriptors.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use crate::{
    descriptor::{DataDescriptor, MessageDescriptor},
    format::{json_format, object_format, FormatError},
    value::Value,
};

/// A message instance described by a [`MessageDescriptor`].
///
/// Messages are value objects: field storage is keyed by field name, equality
/// is structural over the stored fields, and cloning is a deep copy. A field
/// is either explicitly set, lazily defaulted (see [`DynamicMessage::field_mut`])
/// or absent; absent and null are the same thing, and absent fields are
/// omitted when the message is encoded.
#[derive(Clone)]
pub struct DynamicMessage {
    descriptor: MessageDescriptor,
    fields: BTreeMap<String, FieldEntry>,
}

#[derive(Clone)]
struct FieldEntry {
    value: Value,
    explicit: bool,
}

impl DynamicMessage {
    /// Creates an empty message. In a polymorphic subtype the discriminator
    /// field is pre-set to the subtype's discriminator value, the same way
    /// generated constructors tag their instances.
    pub fn new(descriptor: &MessageDescriptor) -> Self {
        let mut fields = BTreeMap::new();
        if let (Some(field), Some(value)) =
            (descriptor.discriminator(), descriptor.discriminator_value())
        {
            fields.insert(
                field.name().to_owned(),
                FieldEntry {
                    value: Value::Enum(value.to_owned()),
                    explicit: true,
                },
            );
        }

        DynamicMessage {
            descriptor: descriptor.clone(),
            fields,
        }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Returns the stored value of a field, or `None` when the field is
    /// unset or unknown.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).map(|entry| &entry.value)
    }

    /// Returns the stored value of a field or its typed default, without
    /// modifying the message. `None` for unknown fields.
    pub fn get_or_default(&self, name: &str) -> Option<Value> {
        let field = self.descriptor.find_field(name)?;
        match self.fields.get(name) {
            Some(entry) => Some(entry.value.clone()),
            None => Some(Value::default_of(field.ty())),
        }
    }

    /// Returns a mutable reference to a field value, materializing the typed
    /// default on first access.
    ///
    /// The materialized default is stored, so successive reads observe the
    /// same instance and mutations through the returned reference persist.
    /// The field still reports [`DynamicMessage::has`] `== false` until it is
    /// explicitly set.
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        let field = self.descriptor.find_field(name)?.clone();
        let entry = self
            .fields
            .entry(name.to_owned())
            .or_insert_with(|| FieldEntry {
                value: Value::default_of(field.ty()),
                explicit: false,
            });
        Some(&mut entry.value)
    }

    /// Sets a field. A [`Value::Null`] clears it.
    ///
    /// # Panics
    ///
    /// Panics when the descriptor has no field with this name; use
    /// [`DynamicMessage::try_set`] for a checked variant.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        if !self.try_set(name, value) {
            panic!(
                "no field {:?} in message {}",
                name,
                self.descriptor.name()
            );
        }
        self
    }

    /// Sets a field, returning `false` when the descriptor has no field with
    /// this name.
    pub fn try_set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        if self.descriptor.find_field(name).is_none() {
            return false;
        }

        match value.into() {
            Value::Null => {
                self.fields.remove(name);
            }
            value => {
                self.fields.insert(
                    name.to_owned(),
                    FieldEntry {
                        value,
                        explicit: true,
                    },
                );
            }
        }
        true
    }

    /// Builder-style [`DynamicMessage::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Whether a field has been explicitly set. Lazily materialized defaults
    /// do not count.
    pub fn has(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .map(|entry| entry.explicit)
            .unwrap_or(false)
    }

    pub fn clear(&mut self, name: &str) {
        self.fields.remove(name);
    }

    /// Deep-copies present fields of another message into this one, skipping
    /// discriminators. The messages must be the same type or related through
    /// inheritance; unrelated messages are left untouched.
    pub fn merge(&mut self, other: &DynamicMessage) {
        let descriptor = if other.descriptor.extends(&self.descriptor) {
            self.descriptor.clone()
        } else if self.descriptor.extends(&other.descriptor) {
            other.descriptor.clone()
        } else {
            return;
        };

        for field in descriptor.fields() {
            if field.is_discriminator() {
                continue;
            }
            if let Some(value) = other.get(field.name()) {
                self.set(field.name(), value.clone());
            }
        }
    }

    /// Converts this message to a JSON-compatible object tree.
    pub fn to_object(&self) -> Result<serde_json::Value, FormatError> {
        object_format().write(
            &Value::Message(self.clone()),
            &DataDescriptor::Message(self.descriptor.clone()),
        )
    }

    /// Parses a message from a JSON-compatible object tree.
    pub fn from_object(
        descriptor: &MessageDescriptor,
        object: &serde_json::Value,
    ) -> Result<DynamicMessage, FormatError> {
        object_format()
            .read(object, &DataDescriptor::Message(descriptor.clone()))?
            .into_message()
            .ok_or_else(|| FormatError::mismatch("message object", object.to_string()))
    }

    /// Serializes this message to a JSON string.
    pub fn to_json(&self) -> Result<String, FormatError> {
        json_format().write(
            &Value::Message(self.clone()),
            &DataDescriptor::Message(self.descriptor.clone()),
        )
    }

    /// Serializes this message to an indented JSON string.
    pub fn to_json_pretty(&self) -> Result<String, FormatError> {
        json_format().write_pretty(
            &Value::Message(self.clone()),
            &DataDescriptor::Message(self.descriptor.clone()),
        )
    }

    /// Parses a message from a JSON string. Polymorphic descriptors resolve
    /// the concrete subtype from the discriminator field.
    pub fn from_json(
        descriptor: &MessageDescriptor,
        s: &str,
    ) -> Result<DynamicMessage, FormatError> {
        json_format()
            .read(s, &DataDescriptor::Message(descriptor.clone()))?
            .into_message()
            .ok_or_else(|| FormatError::mismatch("message object", s.to_owned()))
    }

    /// Parses a message from a JSON string and merges it into this one.
    pub fn merge_json(&mut self, s: &str) -> Result<(), FormatError> {
        let message = DynamicMessage::from_json(&self.descriptor, s)?;
        self.merge(&message);
        Ok(())
    }

    /// Parses a message from an object tree and merges it into this one.
    pub fn merge_object(&mut self, object: &serde_json::Value) -> Result<(), FormatError> {
        let message = DynamicMessage::from_object(&self.descriptor, object)?;
        self.merge(&message);
        Ok(())
    }

    pub(crate) fn cmp_fields(&self, other: &DynamicMessage) -> Ordering {
        self.fields
            .iter()
            .map(|(name, entry)| (name, &entry.value))
            .cmp(other.fields.iter().map(|(name, entry)| (name, &entry.value)))
    }
}

impl PartialEq for DynamicMessage {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.cmp_fields(other) == Ordering::Equal
    }
}

impl Eq for DynamicMessage {}

impl Ord for DynamicMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deterministic within a process: messages of distinct descriptors
        // order by name, then by descriptor identity.
        self.descriptor
            .name()
            .cmp(other.descriptor.name())
            .then_with(|| self.descriptor.addr().cmp(&other.descriptor.addr()))
            .then_with(|| self.cmp_fields(other))
    }
}

impl PartialOrd for DynamicMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DynamicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.descriptor.name());
        for (name, entry) in &self.fields {
            s.field(name, &entry.value);
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldDescriptor;

    fn test_message() -> MessageDescriptor {
        MessageDescriptor::builder("TestMessage")
            .field(FieldDescriptor::new("string0", DataDescriptor::String))
            .field(FieldDescriptor::new("bool0", DataDescriptor::Bool))
            .field(FieldDescriptor::new(
                "list0",
                DataDescriptor::list(DataDescriptor::Int32),
            ))
            .build()
    }

    #[test]
    fn get_set_has() {
        let descriptor = test_message();
        let mut message = descriptor.new_instance();

        assert_eq!(message.get("string0"), None);
        assert!(!message.has("string0"));
        assert_eq!(
            message.get_or_default("string0"),
            Some(Value::String(String::new()))
        );

        message.set("string0", "hello");
        assert_eq!(message.get("string0"), Some(&Value::String("hello".into())));
        assert!(message.has("string0"));

        message.set("string0", Value::Null);
        assert!(!message.has("string0"));
        assert_eq!(message.get("string0"), None);
    }

    #[test]
    fn lazy_default_is_identity_stable() {
        let descriptor = test_message();
        let mut message = descriptor.new_instance();
        assert!(!message.has("list0"));

        if let Some(Value::List(list)) = message.field_mut("list0") {
            list.push(Value::I32(1));
        }

        // The materialized default was stored, so the mutation persists; the
        // field is still not explicitly set.
        assert_eq!(message.get("list0"), Some(&Value::List(vec![Value::I32(1)])));
        assert!(!message.has("list0"));
    }

    #[test]
    fn equality_is_structural() {
        let descriptor = test_message();
        let a = descriptor.new_instance().with("string0", "hello");
        let b = descriptor.new_instance().with("string0", "hello");
        let c = descriptor.new_instance().with("string0", "world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, descriptor.new_instance());
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let descriptor = test_message();
        let mut a = descriptor.new_instance();
        a.set("list0", Value::List(vec![Value::I32(1)]));

        let b = a.clone();
        if let Some(Value::List(list)) = a.field_mut("list0") {
            list.push(Value::I32(2));
        }

        assert_eq!(b.get("list0"), Some(&Value::List(vec![Value::I32(1)])));
    }

    #[test]
    fn merge_copies_present_fields() {
        let descriptor = test_message();
        let mut target = descriptor.new_instance().with("string0", "hello");
        let source = descriptor
            .new_instance()
            .with("bool0", true)
            .with("list0", Value::List(vec![Value::I32(3)]));

        target.merge(&source);
        assert_eq!(target.get("string0"), Some(&Value::String("hello".into())));
        assert_eq!(target.get("bool0"), Some(&Value::Bool(true)));
        assert_eq!(target.get("list0"), Some(&Value::List(vec![Value::I32(3)])));
    }

    #[test]
    fn merge_json_parses_and_merges() {
        let descriptor = test_message();
        let mut target = descriptor.new_instance().with("string0", "hello");

        target.merge_json(r#"{"bool0": true}"#).unwrap();
        assert_eq!(target.get("string0"), Some(&Value::String("hello".into())));
        assert_eq!(target.get("bool0"), Some(&Value::Bool(true)));

        target
            .merge_object(&serde_json::json!({"string0": "world"}))
            .unwrap();
        assert_eq!(target.get("string0"), Some(&Value::String("world".into())));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let descriptor = test_message();
        let mut message = descriptor.new_instance();

        assert!(!message.try_set("unknown", 1));
        assert_eq!(message.get_or_default("unknown"), None);
        assert_eq!(message.field_mut("unknown"), None);
    }
}
