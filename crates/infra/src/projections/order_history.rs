use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopfront_catalog::ProductId;
use shopfront_core::{AggregateId, UserId};
use shopfront_events::EventEnvelope;
use shopfront_orders::{OrderEvent, OrderId, OrderStatus};

use crate::checkout::ORDER_AGGREGATE_TYPE;
use crate::read_model::ReadModelStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineReadModel {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price snapshot at purchase, smallest currency unit.
    pub unit_price: u64,
}

/// One order as shown in the user's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderReadModel {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub full_name: String,
    pub address: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineReadModel>,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum OrderHistoryProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),
    #[error("event stream mismatch: {0}")]
    StreamMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projects order events into the per-user order history.
///
/// Read-only for callers: the only mutation paths are committed events.
#[derive(Debug)]
pub struct OrderHistoryProjection<S>
where
    S: ReadModelStore<OrderId, OrderReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> OrderHistoryProjection<S>
where
    S: ReadModelStore<OrderId, OrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: &OrderId) -> Option<OrderReadModel> {
        self.store.get(order_id)
    }

    /// All orders owned by `user_id`, newest first.
    pub fn list_for_user(&self, user_id: UserId) -> Vec<OrderReadModel> {
        let mut orders: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|o| o.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        orders
    }

    fn cursor(&self, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors.get(&aggregate_id).unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), OrderHistoryProjectionError> {
        if envelope.aggregate_type() != ORDER_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(aggregate_id);
        if seq == 0 {
            return Err(OrderHistoryProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(OrderHistoryProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: OrderEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OrderHistoryProjectionError::Deserialize(e.to_string()))?;

        let order_id = match &ev {
            OrderEvent::OrderPlaced(e) => e.order_id,
            OrderEvent::OrderShipped(e) => e.order_id,
            OrderEvent::OrderDelivered(e) => e.order_id,
            OrderEvent::OrderCancelled(e) => e.order_id,
        };

        if order_id.0 != aggregate_id {
            return Err(OrderHistoryProjectionError::StreamMismatch(
                "event order_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            OrderEvent::OrderPlaced(e) => {
                let lines: Vec<OrderLineReadModel> = e
                    .lines
                    .iter()
                    .map(|l| OrderLineReadModel {
                        line_no: l.line_no,
                        product_id: l.product_id,
                        quantity: l.quantity,
                        unit_price: l.unit_price,
                    })
                    .collect();
                let total = lines.iter().map(|l| l.unit_price * l.quantity as u64).sum();

                self.store.upsert(
                    e.order_id,
                    OrderReadModel {
                        order_id: e.order_id,
                        user_id: e.user_id,
                        status: OrderStatus::Pending,
                        full_name: e.delivery.full_name,
                        address: e.delivery.address,
                        phone: e.delivery.phone,
                        created_at: e.occurred_at,
                        lines,
                        total,
                    },
                );
            }
            OrderEvent::OrderShipped(e) => self.set_status(e.order_id, OrderStatus::Shipped),
            OrderEvent::OrderDelivered(e) => self.set_status(e.order_id, OrderStatus::Delivered),
            OrderEvent::OrderCancelled(e) => self.set_status(e.order_id, OrderStatus::Cancelled),
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    fn set_status(&self, order_id: OrderId, status: OrderStatus) {
        if let Some(mut rm) = self.store.get(&order_id) {
            rm.status = status;
            self.store.upsert(order_id, rm);
        }
    }

    /// Wipe the read model and replay the given envelopes in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OrderHistoryProjectionError> {
        self.store.clear();
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
