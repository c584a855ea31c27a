use std::collections::BTreeMap;

use bson::Document;
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{ResultExt as _, Snafu};

use super::event::Event;

/// Name that refers to the event payload itself when decoding in raw mode.
pub const PAYLOAD_FIELD: &str = "payload";

/// How event payloads are interpreted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Payload is opaque text; values and tags come from the event's fields.
    #[default]
    Raw,

    /// Payload is a JSON object.
    Json,

    /// Payload is a BSON document.
    Bson,
}

/// An error decoding an event payload.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum DecodeError {
    /// Payload was not a JSON object.
    #[snafu(display("Failed to decode payload as JSON object: {}", source))]
    Json {
        /// Error source.
        source: serde_json::Error,
    },

    /// Payload was not a BSON document.
    #[snafu(display("Failed to decode payload as BSON document: {}", source))]
    Bson {
        /// Error source.
        source: bson::de::Error,
    },
}

/// Values and tags looked up for one event.
///
/// `values` is aligned with the configured value names; `None` marks a value that could not be resolved.
#[derive(Debug, PartialEq)]
pub(super) struct Resolved {
    pub values: Vec<Option<Value>>,
    pub tags: BTreeMap<String, String>,
}

pub(super) fn decode_raw<E>(event: &E, values: &[String], tags: &[String]) -> Resolved
where
    E: Event + ?Sized,
{
    let values = values
        .iter()
        .map(|name| {
            if name == PAYLOAD_FIELD {
                Some(Value::String(String::from_utf8_lossy(event.payload()).into_owned()))
            } else {
                event.field_value(name).and_then(non_null)
            }
        })
        .collect();

    let tags = tags
        .iter()
        .filter_map(|name| {
            event
                .field_value(name)
                .and_then(non_null)
                .map(|value| (name.clone(), tag_string(value)))
        })
        .collect();

    Resolved { values, tags }
}

pub(super) fn decode_json(payload: &[u8], values: &[String], tags: &[String]) -> Result<Resolved, DecodeError> {
    let object: Map<String, Value> = serde_json::from_slice(payload).context(Json)?;
    Ok(resolve_from_object(&object, values, tags))
}

pub(super) fn decode_bson(payload: &[u8], values: &[String], tags: &[String]) -> Result<Resolved, DecodeError> {
    let document = Document::from_reader(payload).context(Bson)?;
    let object = document
        .into_iter()
        .map(|(key, value)| (key, value.into_relaxed_extjson()))
        .collect::<Map<_, _>>();

    Ok(resolve_from_object(&object, values, tags))
}

fn resolve_from_object(object: &Map<String, Value>, values: &[String], tags: &[String]) -> Resolved {
    let tags = tags
        .iter()
        .filter_map(|name| {
            object
                .get(name)
                .cloned()
                .and_then(non_null)
                .map(|value| (name.clone(), tag_string(value)))
        })
        .collect();

    let values = values
        .iter()
        .map(|name| object.get(name).cloned().and_then(non_null))
        .collect();

    Resolved { values, tags }
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

fn tag_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
