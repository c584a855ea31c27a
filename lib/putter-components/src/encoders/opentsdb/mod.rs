//! OpenTSDB point encoder.
//!
//! Turns measurement events into OpenTSDB data points, one JSON fragment per point. Each configured value name yields
//! one candidate point; points whose value cannot be resolved are dropped.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use metrics::{counter, Counter};
use putter_common::deser::StringOrList;
use putter_config::GenericConfiguration;
use putter_error::{generic_error, GenericError};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

mod decode;
pub use self::decode::{DecodeError, DecodeMode, PAYLOAD_FIELD};
use self::decode::{decode_bson, decode_json, decode_raw, Resolved};

mod event;
pub use self::event::{Event, RawEvent};

mod point;
pub use self::point::{DataPoint, Fragment, TagSet};

const CONFIG_SECTION: &str = "encoder";

fn default_values() -> Vec<String> {
    vec![PAYLOAD_FIELD.to_string()]
}

/// A list of names given either as a sequence or a comma-separated string.
#[serde_as]
#[derive(Deserialize)]
#[serde(transparent)]
struct Names(#[serde_as(as = "StringOrList")] Vec<String>);

/// OpenTSDB encoder configuration.
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct OpenTsdbEncoderConfiguration {
    /// How event payloads are interpreted.
    ///
    /// Defaults to `raw`.
    #[serde(default)]
    pub decode: DecodeMode,

    /// Names of the values to emit, in order.
    ///
    /// `payload` refers to the event payload in `raw` mode and is emitted under the bare metric name. Any other name is
    /// emitted as `<metric>.<name>`.
    ///
    /// Defaults to `["payload"]`.
    #[serde_as(as = "StringOrList")]
    #[serde(default = "default_values")]
    pub values: Vec<String>,

    /// Names of the fields to attach as tags.
    ///
    /// Defaults to no tags.
    #[serde_as(as = "StringOrList")]
    #[serde(default)]
    pub tags: Vec<String>,

    /// Root metric name.
    pub metric: String,

    /// Replacement values for tags that resolve to an empty string, keyed by tag name.
    #[serde(default)]
    pub tag_for_empty: HashMap<String, String>,
}

impl OpenTsdbEncoderConfiguration {
    /// Creates a new `OpenTsdbEncoderConfiguration` from the `encoder` section of the given configuration.
    ///
    /// Each setting is read from `encoder_<name>` (as set through environment variables) before falling back to
    /// `encoder.<name>`.
    ///
    /// # Errors
    ///
    /// If `metric` is missing, or any setting has an invalid value, an error will be returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let decode = lookup(config, "decode")?.unwrap_or_default();
        let values = lookup::<Names>(config, "values")?.map_or_else(default_values, |names| names.0);
        let tags = lookup::<Names>(config, "tags")?.map(|names| names.0).unwrap_or_default();
        let tag_for_empty = lookup(config, "tag_for_empty")?.unwrap_or_default();
        let metric = match lookup(config, "metric")? {
            Some(metric) => metric,
            None => config.get_typed(&format!("{}.metric", CONFIG_SECTION))?,
        };

        Ok(Self {
            decode,
            values,
            tags,
            metric,
            tag_for_empty,
        })
    }
}

fn lookup<T>(config: &GenericConfiguration, name: &str) -> Result<Option<T>, GenericError>
where
    T: for<'de> Deserialize<'de>,
{
    if let Some(value) = config.try_get_typed(&format!("{}_{}", CONFIG_SECTION, name))? {
        return Ok(Some(value));
    }

    Ok(config.try_get_typed(&format!("{}.{}", CONFIG_SECTION, name))?)
}

/// OpenTSDB point encoder.
#[derive(Clone)]
pub struct OpenTsdbEncoder {
    mode: DecodeMode,
    values: Vec<String>,
    tags: Vec<String>,
    metric: String,
    tag_for_empty: HashMap<String, String>,
    points_dropped_unresolved: Counter,
}

impl OpenTsdbEncoder {
    /// Creates a new `OpenTsdbEncoder` from the given configuration.
    ///
    /// # Errors
    ///
    /// If `metric` is empty, or no value names are configured, an error will be returned.
    pub fn from_configuration(config: OpenTsdbEncoderConfiguration) -> Result<Self, GenericError> {
        if config.metric.is_empty() {
            return Err(generic_error!("Encoder metric name must not be empty."));
        }
        if config.values.is_empty() {
            return Err(generic_error!("Encoder must be configured with at least one value name."));
        }

        Ok(Self {
            mode: config.decode,
            values: config.values,
            tags: config.tags,
            metric: config.metric,
            tag_for_empty: config.tag_for_empty,
            points_dropped_unresolved: counter!("putter_points_dropped_total", "reason" => "unresolved"),
        })
    }

    /// Encodes an event into fragments, stamped with the current time.
    ///
    /// An event whose values are all unresolved produces no fragments.
    ///
    /// # Errors
    ///
    /// If the payload cannot be decoded in the configured mode, an error will be returned and no fragments are produced.
    pub fn encode<E>(&self, event: &E) -> Result<Vec<Fragment>, DecodeError>
    where
        E: Event + ?Sized,
    {
        self.encode_with(event, || Utc::now().timestamp())
    }

    /// Encodes an event into fragments, stamped with the given timestamp (seconds since the Unix epoch).
    ///
    /// # Errors
    ///
    /// If the payload cannot be decoded in the configured mode, an error will be returned and no fragments are produced.
    pub fn encode_at<E>(&self, event: &E, timestamp: i64) -> Result<Vec<Fragment>, DecodeError>
    where
        E: Event + ?Sized,
    {
        self.encode_with(event, || timestamp)
    }

    fn encode_with<E, F>(&self, event: &E, now: F) -> Result<Vec<Fragment>, DecodeError>
    where
        E: Event + ?Sized,
        F: FnOnce() -> i64,
    {
        let Resolved { values, mut tags } = match self.mode {
            DecodeMode::Raw => decode_raw(event, &self.values, &self.tags),
            DecodeMode::Json => decode_json(event.payload(), &self.values, &self.tags)?,
            DecodeMode::Bson => decode_bson(event.payload(), &self.values, &self.tags)?,
        };

        self.substitute_empty_tags(&mut tags);
        let tags = TagSet::from(tags);
        let timestamp = now();

        let mut fragments = Vec::with_capacity(values.len());
        for (name, value) in self.values.iter().zip(values) {
            let Some(value) = value else {
                self.points_dropped_unresolved.increment(1);
                continue;
            };

            let point = DataPoint {
                metric: self.metric_name(name),
                value,
                tags: tags.clone(),
                timestamp,
            };
            match point.to_fragment() {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => warn!(metric = %point.metric, error = %e, "Failed to serialize data point. Dropping."),
            }
        }

        Ok(fragments)
    }

    fn substitute_empty_tags(&self, tags: &mut BTreeMap<String, String>) {
        for (name, value) in tags.iter_mut() {
            if value.is_empty() {
                if let Some(replacement) = self.tag_for_empty.get(name) {
                    value.clone_from(replacement);
                }
            }
        }
    }

    fn metric_name(&self, value_name: &str) -> String {
        if value_name == PAYLOAD_FIELD {
            self.metric.clone()
        } else {
            format!("{}.{}", self.metric, value_name)
        }
    }
}
