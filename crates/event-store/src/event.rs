use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, EventStoreError};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
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

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event inside its aggregate's stream.
///
/// A stream with no events is at version 0. The first event is version 1 and
/// every later event is exactly one higher than its predecessor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Version of a stream that has no events yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Version carried by the first event of a stream.
    pub fn first() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// The version `count` events after this one.
    pub fn advanced_by(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    /// The version `count` events before this one, never below zero.
    pub fn rewound_by(&self, count: usize) -> Self {
        Self((self.0 - count as i64).max(0))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The stored form of a domain event.
///
/// The typed event lives in `payload` as JSON; `event_type` names its variant
/// so readers can filter without decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,

    /// Variant name, e.g. "MoneyDeposited".
    pub event_type: String,

    pub aggregate_id: AggregateId,

    /// Kind of aggregate owning the stream, e.g. "Account".
    pub aggregate_type: String,

    /// Version of the aggregate after this event.
    pub version: Version,

    /// When the event was recorded by the aggregate.
    pub timestamp: DateTime<Utc>,

    pub payload: serde_json::Value,

    /// Free-form context such as correlation ids.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Decodes the payload into the typed event it was built from.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for [`EventEnvelope`].
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. A random one is generated otherwise.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp. Defaults to now.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Serializes `payload` into the envelope.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds the envelope, reporting the first required field left unset.
    pub fn build(self) -> Result<EventEnvelope, EventStoreError> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(EventStoreError::IncompleteEnvelope("event_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(EventStoreError::IncompleteEnvelope("aggregate_id"))?,
            aggregate_type: self
                .aggregate_type
                .ok_or(EventStoreError::IncompleteEnvelope("aggregate_type"))?,
            version: self
                .version
                .ok_or(EventStoreError::IncompleteEnvelope("version"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self
                .payload
                .ok_or(EventStoreError::IncompleteEnvelope("payload"))?,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_arithmetic() {
        assert_eq!(Version::initial().next(), Version::first());
        assert_eq!(Version::new(3).advanced_by(2), Version::new(5));
        assert_eq!(Version::new(3).rewound_by(2), Version::first());
        assert_eq!(Version::new(1).rewound_by(5), Version::initial());
        assert!(Version::new(1) < Version::new(2));
    }

    #[test]
    fn builder_fills_defaults() {
        let aggregate_id = AggregateId::new();
        let envelope = EventEnvelope::builder()
            .event_type("MoneyDeposited")
            .aggregate_id(aggregate_id)
            .aggregate_type("Account")
            .version(Version::first())
            .payload_raw(serde_json::json!({"amount": 5}))
            .metadata("correlation_id", serde_json::json!("abc"))
            .build()
            .unwrap();

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.version, Version::first());
        assert_eq!(
            envelope.metadata.get("correlation_id"),
            Some(&serde_json::json!("abc"))
        );
    }

    #[test]
    fn builder_reports_missing_field() {
        let err = EventEnvelope::builder()
            .event_type("MoneyDeposited")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::IncompleteEnvelope("aggregate_id")
        ));
    }

    #[test]
    fn decode_reads_payload() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Deposit {
            amount: i64,
        }

        let envelope = EventEnvelope::builder()
            .event_type("MoneyDeposited")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Account")
            .version(Version::first())
            .payload_raw(serde_json::json!({"amount": 5}))
            .build()
            .unwrap();

        assert_eq!(envelope.decode::<Deposit>().unwrap(), Deposit { amount: 5 });
    }
}
