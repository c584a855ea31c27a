//! Deserialization helpers.
//!
//! Configuration reaches the shipper through YAML files and environment variables alike, and the two disagree on how
//! scalars and lists look. These helpers accept the more permissive shapes and are meant to be used with `serde_with`.

use std::fmt;

use serde::{
    de::{Error, SeqAccess, Unexpected},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Permissively deserializes a boolean.
///
/// Accepts:
///
/// - `true` or `false` as a native boolean
/// - `"true"` or `"false"` as a string (case insensitive)
/// - `1` or `0` as an integer
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, string, or integer")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(value)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value.to_lowercase().as_str() {
                    "true" => Ok(true),
                    "false" => Ok(false),
                    _ => Err(Error::invalid_value(
                        Unexpected::Str(value),
                        &"\"true\" or \"false\" (case insensitive)",
                    )),
                }
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Signed(value), &"0 or 1")),
                }
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: Error,
            {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &"0 or 1")),
                }
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

/// Deserializes a list of strings from either a sequence or a comma-separated string.
///
/// `"host, region,,dc"` and `["host", "region", "dc"]` both produce `["host", "region", "dc"]`: entries are trimmed and
/// blank entries are skipped in either form.
pub struct StringOrList;

impl<'de> DeserializeAs<'de, Vec<String>> for StringOrList {
    fn deserialize_as<D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'vde> serde::de::Visitor<'vde> for Visitor {
            type Value = Vec<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a list of strings or a comma-separated string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'vde>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(item) = seq.next_element::<String>()? {
                    let item = item.trim();
                    if !item.is_empty() {
                        items.push(item.to_string());
                    }
                }
                Ok(items)
            }

            fn visit_none<E>(self) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(Vec::new())
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: Error,
            {
                Ok(Vec::new())
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_with::serde_as;

    use super::*;

    #[serde_as]
    #[derive(Deserialize)]
    struct Tags {
        #[serde_as(as = "StringOrList")]
        tags: Vec<String>,
    }

    #[serde_as]
    #[derive(Deserialize)]
    struct Flag {
        #[serde_as(as = "PermissiveBool")]
        enabled: bool,
    }

    #[test]
    fn string_or_list_from_comma_separated() {
        let parsed: Tags = serde_json::from_str(r#"{"tags": "host, region,,dc"}"#).unwrap();
        assert_eq!(parsed.tags, vec!["host", "region", "dc"]);
    }

    #[test]
    fn string_or_list_from_sequence() {
        let parsed: Tags = serde_json::from_str(r#"{"tags": ["host", " ", "dc "]}"#).unwrap();
        assert_eq!(parsed.tags, vec!["host", "dc"]);
    }

    #[test]
    fn string_or_list_empty_string() {
        let parsed: Tags = serde_json::from_str(r#"{"tags": ""}"#).unwrap();
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn permissive_bool_variants() {
        for (input, expected) in [("true", true), ("\"FALSE\"", false), ("1", true), ("0", false)] {
            let parsed: Flag = serde_json::from_str(&format!(r#"{{"enabled": {}}}"#, input)).unwrap();
            assert_eq!(parsed.enabled, expected, "input: {}", input);
        }

        assert!(serde_json::from_str::<Flag>(r#"{"enabled": 2}"#).is_err());
        assert!(serde_json::from_str::<Flag>(r#"{"enabled": "yes"}"#).is_err());
    }
}
