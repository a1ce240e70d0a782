//! Postgres-backed event store implementation.
//!
//! Persists events append-only with optimistic concurrency enforced at the
//! database level.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE events (
//!     event_id        UUID PRIMARY KEY,
//!     aggregate_id    UUID        NOT NULL,
//!     aggregate_type  TEXT        NOT NULL,
//!     sequence_number BIGINT      NOT NULL CHECK (sequence_number > 0),
//!     event_type      TEXT        NOT NULL,
//!     event_version   INT         NOT NULL,
//!     occurred_at     TIMESTAMPTZ NOT NULL,
//!     payload         JSONB       NOT NULL,
//!     created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     UNIQUE (aggregate_id, sequence_number)
//! );
//! ```
//!
//! ## Error mapping
//!
//! | SQLx error | PostgreSQL code | `EventStoreError` | Scenario |
//! |------------|-----------------|-------------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Concurrent append detected (unique constraint on sequence_number) |
//! | Database (check violation)  | `23514` | `InvalidAppend` | Invalid data (e.g., sequence_number <= 0) |
//! | Database (other)            | any     | `InvalidAppend` | Other database errors |
//! | Pool/connection/row errors  | n/a     | `InvalidAppend` | Network failures, closed pool, etc. |
//!
//! ## Concurrency
//!
//! `append_batches` runs the whole multi-stream batch in **one SQL
//! transaction**: every stream's current version is read and checked against
//! its expectation, then all inserts happen, then commit. If another
//! transaction commits to any of those streams in between, the unique
//! constraint on `(aggregate_id, sequence_number)` fails the insert and the
//! whole transaction rolls back: the row-level equivalent of the in-memory
//! store's single-writer check.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use shopfront_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};

/// Postgres-backed append-only event store.
///
/// Cloneable; all operations go through the SQLx connection pool. The sync
/// [`EventStore`] impl bridges onto the pool with `block_in_place`, which
/// requires the multi-thread Tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    runtime: tokio::runtime::Handle,
}

impl PostgresEventStore {
    /// Create a new store on the given pool, bridged onto `runtime`.
    pub fn new(pool: PgPool, runtime: tokio::runtime::Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| self.runtime.block_on(fut))
    }

    /// Load all events for an aggregate stream, ascending by sequence number.
    #[instrument(skip(self), fields(aggregate_id = %aggregate_id.as_uuid()), err)]
    pub async fn load_stream_async(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter().map(row_to_stored).collect()
    }

    /// Load every stored event, ordered by stream and sequence number
    /// (projection rebuild support).
    #[instrument(skip(self), err)]
    pub async fn load_all_async(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            ORDER BY aggregate_id, sequence_number ASC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_all", e))?;

        rows.iter().map(row_to_stored).collect()
    }

    /// Atomically append to several streams with per-stream optimistic
    /// concurrency checks; all batches commit or none do.
    #[instrument(skip(self, batches), fields(batch_count = batches.len()), err)]
    pub async fn append_batches_async(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if batches.is_empty() {
            return Ok(vec![]);
        }

        // Validate batch shapes before opening a transaction.
        let mut seen = HashSet::new();
        for batch in &batches {
            let (aggregate_id, _) = validate_batch(batch)?;
            if !seen.insert(aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "duplicate stream in batch append: {aggregate_id}"
                )));
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut stored_events = Vec::new();

        for batch in batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let aggregate_type = batch.events[0].aggregate_type.clone();

            let (current_version, existing_type) =
                check_stream_version(&mut tx, aggregate_id).await?;

            if let Some(existing) = existing_type {
                if existing != aggregate_type {
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("rollback", e))?;
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{existing}', attempted append with '{aggregate_type}'"
                    )));
                }
            }

            if !batch.expected_version.matches(current_version) {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current_version}",
                    batch.expected_version
                )));
            }

            let mut next_sequence = current_version + 1;
            for event in batch.events {
                sqlx::query(
                    r#"
                    INSERT INTO events (
                        event_id,
                        aggregate_id,
                        aggregate_type,
                        sequence_number,
                        event_type,
                        event_version,
                        occurred_at,
                        payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(event.event_id)
                .bind(event.aggregate_id.as_uuid())
                .bind(&event.aggregate_type)
                .bind(next_sequence as i64)
                .bind(&event.event_type)
                .bind(event.event_version as i32)
                .bind(event.occurred_at)
                .bind(&event.payload)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        EventStoreError::Concurrency(format!(
                            "concurrent append detected: sequence_number {next_sequence} already exists"
                        ))
                    } else {
                        map_sqlx_error("insert_event", e)
                    }
                })?;

                stored_events.push(StoredEvent {
                    event_id: event.event_id,
                    aggregate_id: event.aggregate_id,
                    aggregate_type: event.aggregate_type,
                    sequence_number: next_sequence,
                    event_type: event.event_type,
                    event_version: event.event_version,
                    occurred_at: event.occurred_at,
                    payload: event.payload,
                });
                next_sequence += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored_events)
    }
}

impl EventStore for PostgresEventStore {
    fn append_batches(
        &self,
        batches: Vec<StreamAppend>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.append_batches_async(batches))
    }

    fn load_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.load_stream_async(aggregate_id))
    }

    fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.block_on(self.load_all_async())
    }
}

fn validate_batch(batch: &StreamAppend) -> Result<(AggregateId, &str), EventStoreError> {
    let first = batch
        .events
        .first()
        .ok_or_else(|| EventStoreError::InvalidAppend("batch contains no events".to_string()))?;

    for (idx, e) in batch.events.iter().enumerate() {
        if e.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }
        if e.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::AggregateTypeMismatch(format!(
                "batch contains multiple aggregate_types (index {idx})"
            )));
        }
    }

    Ok((first.aggregate_id, first.aggregate_type.as_str()))
}

async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MIN(aggregate_type) AS aggregate_type
        FROM events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::InvalidAppend(format!("bad version row: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::InvalidAppend(format!("bad version row: {e}")))?;

    Ok((current as u64, aggregate_type))
}

fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredEvent, EventStoreError> {
    let read = |e: sqlx::Error| EventStoreError::InvalidAppend(format!("bad event row: {e}"));

    let event_id: Uuid = row.try_get("event_id").map_err(read)?;
    let aggregate_id: Uuid = row.try_get("aggregate_id").map_err(read)?;
    let aggregate_type: String = row.try_get("aggregate_type").map_err(read)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(read)?;
    let event_type: String = row.try_get("event_type").map_err(read)?;
    let event_version: i32 = row.try_get("event_version").map_err(read)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(read)?;
    let payload: serde_json::Value = row.try_get("payload").map_err(read)?;

    Ok(StoredEvent {
        event_id,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        aggregate_type,
        sequence_number: sequence_number as u64,
        event_type,
        event_version: event_version as u32,
        occurred_at,
        payload,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    EventStoreError::InvalidAppend(format!("{operation} failed: {err}"))
}
