use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use shopfront_catalog::{ProductEvent, ProductId};
use shopfront_core::AggregateId;
use shopfront_events::EventEnvelope;

use crate::checkout::PRODUCT_AGGREGATE_TYPE;
use crate::read_model::ReadModelStore;

/// Catalog browse view of one product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Current price in smallest currency unit.
    pub unit_price: u64,
    pub stock: i64,
    pub archived: bool,
}

#[derive(Debug, Error)]
pub enum CatalogProjectionError {
    #[error("failed to deserialize product event: {0}")]
    Deserialize(String),
    #[error("event stream mismatch: {0}")]
    StreamMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Projects product events into the browsable catalog read model.
///
/// Idempotent per stream: a per-aggregate cursor skips envelopes already
/// applied, so at-least-once delivery is safe.
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: ReadModelStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> ProductCatalogProjection<S>
where
    S: ReadModelStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(product_id)
    }

    /// All products, unarchived first-class; callers filter as needed.
    pub fn list(&self) -> Vec<ProductReadModel> {
        let mut items = self.store.list();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        items
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
    ) -> Result<(), CatalogProjectionError> {
        if envelope.aggregate_type() != PRODUCT_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.cursor(aggregate_id);
        if seq == 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(CatalogProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: ProductEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CatalogProjectionError::Deserialize(e.to_string()))?;

        let product_id = match &ev {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::PriceChanged(e) => e.product_id,
            ProductEvent::StockAdjusted(e) => e.product_id,
            ProductEvent::ProductArchived(e) => e.product_id,
        };

        if product_id.0 != aggregate_id {
            return Err(CatalogProjectionError::StreamMismatch(
                "event product_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            ProductEvent::ProductCreated(e) => {
                self.store.upsert(
                    e.product_id,
                    ProductReadModel {
                        product_id: e.product_id,
                        name: e.name,
                        description: e.description,
                        category: e.category,
                        unit_price: e.unit_price,
                        stock: 0,
                        archived: false,
                    },
                );
            }
            ProductEvent::PriceChanged(e) => {
                if let Some(mut rm) = self.store.get(&e.product_id) {
                    rm.unit_price = e.unit_price;
                    self.store.upsert(e.product_id, rm);
                }
            }
            ProductEvent::StockAdjusted(e) => {
                if let Some(mut rm) = self.store.get(&e.product_id) {
                    rm.stock += e.delta;
                    self.store.upsert(e.product_id, rm);
                }
            }
            ProductEvent::ProductArchived(e) => {
                if let Some(mut rm) = self.store.get(&e.product_id) {
                    rm.archived = true;
                    self.store.upsert(e.product_id, rm);
                }
            }
        }

        self.update_cursor(aggregate_id, seq);
        Ok(())
    }

    /// Wipe the read model and replay the given envelopes in stream order.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CatalogProjectionError> {
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
