use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{AggregateId, Result};

/// Unique identifier for a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Position of an event inside its stream.
///
/// An empty stream sits at version 0. The first event is version 1 and each
/// later one adds one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream that has not recorded anything yet.
    pub const fn initial() -> Self {
        Self(0)
    }

    pub const fn first() -> Self {
        Self(1)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Versions `self + 1 ..= self + count`, the slots a batch of `count`
    /// events will occupy.
    pub fn following(self, count: usize) -> impl Iterator<Item = Version> {
        (1..=count as i64).map(move |offset| Self(self.0 + offset))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// One recorded event with its stream coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// Variant name of the domain event, e.g. `"ItemAdded"`.
    pub event_type: String,

    pub aggregate_id: AggregateId,

    /// Kind of stream, e.g. `"Cart"`. Recovery enumerates streams by it.
    pub aggregate_type: String,

    /// Version of the stream once this event is applied.
    pub version: Version,

    pub timestamp: DateTime<Utc>,

    /// Serialized domain event.
    pub payload: Value,

    /// Free-form context such as the owning user.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl EventEnvelope {
    /// Wraps an already serialized event, stamped with a fresh id and the
    /// current time.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: Version,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            payload,
            metadata: HashMap::new(),
        }
    }

    /// Serializes `event` and wraps it.
    pub fn encode<T: Serialize>(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: Version,
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            aggregate_type,
            aggregate_id,
            version,
            event_type,
            payload,
        ))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn recorded_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// A string metadata entry, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Whether this event opened its stream.
    pub fn opens_stream(&self) -> bool {
        self.version == Version::first()
    }

    /// Whether both events belong to the same stream.
    pub fn same_stream(&self, other: &EventEnvelope) -> bool {
        self.aggregate_id == other.aggregate_id && self.aggregate_type == other.aggregate_type
    }

    /// Deserializes the payload back into a domain event.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.payload)?)
    }
}
