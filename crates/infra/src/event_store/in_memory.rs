use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use shopfront_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev and single-process deployments. Batch appends are
/// serialized under one write lock: every expected version is checked before
/// anything is written, so a batch either commits entirely or leaves the
/// store untouched. Concurrent checkouts against the same stream therefore
/// see exactly the compare-and-swap semantics the Postgres store provides
/// with a transaction.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn validate_batch(batch: &StreamAppend) -> Result<(AggregateId, String), EventStoreError> {
        let first = batch.events.first().ok_or_else(|| {
            EventStoreError::InvalidAppend("batch contains no events".to_string())
        })?;
        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in batch.events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok((aggregate_id, aggregate_type))
    }
}

impl EventStore for InMemoryEventStore {
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if batches.is_empty() {
            return Ok(vec![]);
        }

        // Per-batch shape checks before taking the lock.
        let mut keys = Vec::with_capacity(batches.len());
        let mut seen = HashSet::new();
        for batch in &batches {
            let (aggregate_id, aggregate_type) = Self::validate_batch(batch)?;
            if !seen.insert(aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "duplicate stream in batch append: {aggregate_id}"
                )));
            }
            keys.push((aggregate_id, aggregate_type));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Phase 1: check every stream before touching any of them.
        for (batch, (aggregate_id, aggregate_type)) in batches.iter().zip(&keys) {
            let stream = streams.get(aggregate_id).map(Vec::as_slice).unwrap_or(&[]);
            let current = Self::current_version(stream);

            if !batch.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current}",
                    batch.expected_version
                )));
            }

            // Enforce aggregate type stability across the stream.
            if let Some(existing) = stream.first() {
                if existing.aggregate_type != *aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, aggregate_type
                    )));
                }
            }
        }

        // Phase 2: all checks passed; assign sequence numbers and append.
        let mut committed = Vec::new();
        for batch in batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let stream = streams.entry(aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;

            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut all: Vec<StoredEvent> = streams.values().flatten().cloned().collect();
        all.sort_by_key(|e| (*e.aggregate_id.as_uuid().as_bytes(), e.sequence_number));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use shopfront_core::ExpectedVersion;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.event".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({"n": 1}),
        }
    }

    #[test]
    fn append_assigns_sequence_numbers_from_one() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let committed = store
            .append(vec![event(id, "test"), event(id, "test")], ExpectedVersion::Exact(0))
            .unwrap();

        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[1].sequence_number, 2);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![event(id, "test")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(id, "test")], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
    }

    #[test]
    fn batch_append_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store
            .append(vec![event(b, "test")], ExpectedVersion::Exact(0))
            .unwrap();

        // Second batch carries a stale expectation for `b`; `a` must not be
        // written either.
        let err = store
            .append_batches(vec![
                StreamAppend::new(vec![event(a, "test")], ExpectedVersion::Exact(0)),
                StreamAppend::new(vec![event(b, "test")], ExpectedVersion::Exact(0)),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        assert!(store.load_stream(a).unwrap().is_empty());
        assert_eq!(store.load_stream(b).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_streams_in_one_batch_are_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let err = store
            .append_batches(vec![
                StreamAppend::new(vec![event(id, "test")], ExpectedVersion::Exact(0)),
                StreamAppend::new(vec![event(id, "test")], ExpectedVersion::Exact(0)),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn aggregate_type_is_stable_per_stream() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![event(id, "cart")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append(vec![event(id, "catalog.product")], ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_all_orders_by_stream_then_sequence() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store
            .append(vec![event(a, "test"), event(a, "test")], ExpectedVersion::Exact(0))
            .unwrap();
        store
            .append(vec![event(b, "test")], ExpectedVersion::Exact(0))
            .unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 3);
        for pair in all.windows(2) {
            if pair[0].aggregate_id == pair[1].aggregate_id {
                assert!(pair[0].sequence_number < pair[1].sequence_number);
            }
        }
    }
}
