use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A serialized data point, ready to be joined into a request body.
pub type Fragment = Bytes;

/// The tags of one event.
///
/// Built once per event and shared, read-only, by every point derived from it. Keys are serialized in sorted order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagSet(Arc<BTreeMap<String, String>>);

impl TagSet {
    /// Returns the value of the given tag.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(tags: BTreeMap<String, String>) -> Self {
        Self(Arc::new(tags))
    }
}

impl Serialize for TagSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

/// A single OpenTSDB data point.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataPoint {
    /// Metric name.
    pub metric: String,

    /// Measured value.
    pub value: Value,

    /// Tags.
    pub tags: TagSet,

    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl DataPoint {
    /// Serializes this point into a fragment.
    ///
    /// # Errors
    ///
    /// If the point cannot be serialized as JSON, an error will be returned.
    pub fn to_fragment(&self) -> Result<Fragment, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
