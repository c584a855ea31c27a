use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// A measurement event handed over by the upstream collaborator.
pub trait Event {
    /// Returns the raw payload bytes.
    fn payload(&self) -> &[u8];

    /// Returns the value of the named field, if the event carries one.
    fn field_value(&self, name: &str) -> Option<Value>;
}

/// An event backed by owned payload bytes and a map of named fields.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RawEvent {
    #[serde(default, deserialize_with = "deserialize_payload")]
    payload: Vec<u8>,

    #[serde(default)]
    fields: HashMap<String, Value>,
}

impl RawEvent {
    /// Creates a new `RawEvent` with the given payload and no fields.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            fields: HashMap::new(),
        }
    }

    /// Adds a named field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl Event for RawEvent {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn field_value(&self, name: &str) -> Option<Value> {
        self.fields.get(name).cloned()
    }
}

// Payloads on the wire are text.
fn deserialize_payload<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(String::into_bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserializes_text_payload_and_fields() {
        let event: RawEvent = serde_json::from_str(r#"{"payload": "42", "fields": {"host": "a1", "cpu": 7}}"#).unwrap();
        assert_eq!(event.payload(), b"42");
        assert_eq!(event.field_value("host"), Some(json!("a1")));
        assert_eq!(event.field_value("cpu"), Some(json!(7)));
        assert_eq!(event.field_value("missing"), None);
    }

    #[test]
    fn missing_parts_default_to_empty() {
        let event: RawEvent = serde_json::from_str("{}").unwrap();
        assert!(event.payload().is_empty());
        assert_eq!(event, RawEvent::default());
    }
}
