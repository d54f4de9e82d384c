//! Aggregates as folds over their event history.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventId, Version};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::DomainError;

/// A fact that happened to one aggregate. Named in the past tense.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Variant name stored as the envelope's `event_type`.
    fn event_type(&self) -> &'static str;
}

/// State of an event-sourced entity.
///
/// The state is never written directly. It is the left fold of [`Aggregate::when`]
/// over the stream, starting from `Default::default()`.
pub trait Aggregate:
    Default + Clone + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Event: DomainEvent;

    /// Domain rule violations raised by the aggregate's decision methods.
    type Error: std::error::Error + Send + Sync + 'static;

    fn aggregate_type() -> &'static str;

    /// Folds one event into the state.
    ///
    /// Must be pure and total: same state and event, same result, for every
    /// variant of `Self::Event`. Events are facts, so this cannot fail.
    fn when(self, event: &Self::Event) -> Self;
}

/// A typed event together with its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent<E> {
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub event: E,
}

impl<E: DomainEvent> RecordedEvent<E> {
    /// Decodes a stored envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: envelope.event_id,
            aggregate_id: envelope.aggregate_id,
            version: envelope.version,
            timestamp: envelope.timestamp,
            event: envelope.decode()?,
        })
    }

    pub fn to_envelope(&self, aggregate_type: &str) -> Result<EventEnvelope, DomainError> {
        Ok(EventEnvelope::builder()
            .event_id(self.event_id)
            .event_type(self.event.event_type())
            .aggregate_id(self.aggregate_id)
            .aggregate_type(aggregate_type)
            .version(self.version)
            .timestamp(self.timestamp)
            .payload(&self.event)?
            .build()?)
    }
}

/// An aggregate instance: its identity, folded state, version and the events
/// the current command produced but nobody has persisted yet.
///
/// Instances are rebuilt for every command and thrown away afterwards.
#[derive(Debug, Clone)]
pub struct AggregateRoot<A: Aggregate> {
    id: AggregateId,
    version: Version,
    state: A,
    uncommitted: Vec<RecordedEvent<A::Event>>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// An aggregate with no history, at version 0.
    pub fn new(id: AggregateId) -> Self {
        Self::restore(id, Version::initial(), A::default())
    }

    /// Resumes from state already folded up to `version`, e.g. a snapshot.
    pub fn restore(id: AggregateId, version: Version, state: A) -> Self {
        Self {
            id,
            version,
            state,
            uncommitted: Vec::new(),
        }
    }

    /// Folds a stored history, in version order, onto a fresh aggregate.
    pub fn load_from_history(
        id: AggregateId,
        history: impl IntoIterator<Item = RecordedEvent<A::Event>>,
    ) -> Self {
        let mut root = Self::new(id);
        root.replay(history);
        root
    }

    /// Folds already-stored events. They do not become uncommitted.
    pub fn replay(&mut self, history: impl IntoIterator<Item = RecordedEvent<A::Event>>) {
        for recorded in history {
            self.state = std::mem::take(&mut self.state).when(&recorded.event);
            self.version = recorded.version;
        }
    }

    /// Records a new event: folds it, bumps the version and queues it for
    /// persistence.
    pub fn apply(&mut self, event: A::Event) {
        self.state = std::mem::take(&mut self.state).when(&event);
        self.version = self.version.next();
        self.uncommitted.push(RecordedEvent {
            event_id: EventId::new(),
            aggregate_id: self.id,
            version: self.version,
            timestamp: Utc::now(),
            event,
        });
    }

    /// Runs a decision against the current state and applies what it returns.
    ///
    /// On error nothing is applied. Returns how many events were recorded;
    /// zero means the command was a no-op.
    pub fn execute<F>(&mut self, decide: F) -> Result<usize, A::Error>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
    {
        let events = decide(&self.state)?;
        let count = events.len();
        for event in events {
            self.apply(event);
        }
        Ok(count)
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Version including uncommitted events.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Version of the last persisted event, the concurrency token for the
    /// next append.
    pub fn committed_version(&self) -> Version {
        self.version.rewound_by(self.uncommitted.len())
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn into_state(self) -> A {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.version == Version::initial()
    }

    pub fn uncommitted_events(&self) -> &[RecordedEvent<A::Event>] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Clears the uncommitted queue after a successful append.
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }
}
