use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use shopfront_core::{AggregateId, ExpectedVersion};

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number).
///
/// Lifecycle: domain event → `UncommittedEvent` (wrapped with stream
/// metadata) → `StoredEvent` (assigned a sequence number on append) →
/// `EventEnvelope` (published to the bus for consumers).
///
/// Use [`UncommittedEvent::from_typed`] to build one from a typed domain
/// event; it serializes the payload and captures the event metadata needed
/// for later deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned by the store during append: monotonically
/// increasing, stream-scoped, immutable. They drive ordering, optimistic
/// concurrency, and projection idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> shopfront_events::EventEnvelope<JsonValue> {
        shopfront_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// One stream's contribution to a batch append: the events to add plus the
/// version the stream must still be at for the batch to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAppend {
    pub events: Vec<UncommittedEvent>,
    pub expected_version: ExpectedVersion,
}

impl StreamAppend {
    pub fn new(events: Vec<UncommittedEvent>, expected_version: ExpectedVersion) -> Self {
        Self {
            events,
            expected_version,
        }
    }
}

/// Append-only event store.
///
/// Events are organized into **streams**, one per aggregate instance, keyed
/// by `aggregate_id`. Within a stream, sequence numbers are monotonically
/// increasing (1, 2, 3, ...).
///
/// ## Batch append semantics
///
/// [`append_batches`](EventStore::append_batches) is the transactional
/// boundary: every stream's expected version is checked and **either all
/// batches commit or none do**. A checkout ties the stock it validated to
/// the stock it decrements by pinning each product stream to the exact
/// version it observed; any interleaved append to one of those streams
/// fails the whole commit with `Concurrency`.
///
/// ## Implementation requirements
///
/// - enforce optimistic concurrency per stream (check before append)
/// - assign sequence numbers monotonically (no gaps, no duplicates)
/// - ensure batch atomicity (all events of all batches, or none)
/// - handle concurrent appends correctly (serialize conflicting commits)
pub trait EventStore: Send + Sync {
    /// Atomically append to several streams (all-or-nothing across streams).
    ///
    /// Each batch must target exactly one stream; batches must target
    /// distinct streams.
    fn append_batches(&self, batches: Vec<StreamAppend>)
    -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an aggregate, in sequence-number order.
    /// Returns an empty vector if the stream doesn't exist yet.
    fn load_stream(&self, aggregate_id: AggregateId)
    -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load every stored event (projection rebuild support), ordered by
    /// stream and sequence number.
    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append events to a single aggregate stream (append-only).
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_batches(vec![StreamAppend::new(events, expected_version)])
    }
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_batches(batches)
    }

    fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all()
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from business, while still capturing event
    /// metadata needed for future deserialization.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: shopfront_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
