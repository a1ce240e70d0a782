//! Checkout: the order-placement transaction engine.
//!
//! Converts a cart into a durable order while enforcing inventory
//! constraints. A single attempt moves through `Validating → Reserving →
//! Committed`, or aborts in `Validating` with no side effects:
//!
//! 1. **Validating**: rehydrate the cart and every referenced product from
//!    their streams; reject empty carts, unknown products, and lines whose
//!    quantity exceeds the stock observed *now* (stock may have moved since
//!    the line was added).
//! 2. **Reserving/Committed**: build one multi-stream batch with the new
//!    order stream (`OrderPlaced` with price snapshots), one stock decrement
//!    per product, and the cart's `CartCleared`. Every product stream is
//!    pinned to the exact version observed during validation, so the batch
//!    commits only if no other checkout or restock interleaved; the store
//!    makes it all-or-nothing.
//!
//! A concurrency rejection retries the whole validate-and-commit cycle once;
//! a second rejection surfaces [`CheckoutError::Conflict`]. The engine never
//! clamps a decrement and never oversells: losing a race produces a fresh
//! validation that sees the reduced stock.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use shopfront_cart::{Cart, CartCommand, CartId, ClearCart};
use shopfront_catalog::{DecrementStock, Product, ProductCommand, ProductId};
use shopfront_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, UserId};
use shopfront_events::{EventBus, EventEnvelope};
use shopfront_orders::{
    DeliveryInfo, NewOrderLine, Order, OrderCommand, OrderId, OrderLine, OrderStatus, PlaceOrder,
};

use crate::command_dispatcher::{DispatchError, load_aggregate};
use crate::event_store::{EventStore, EventStoreError, StreamAppend, UncommittedEvent};

/// Aggregate type tags used on the streams the engine touches.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";
pub const PRODUCT_AGGREGATE_TYPE: &str = "catalog.product";
pub const CART_AGGREGATE_TYPE: &str = "cart";

/// One automatic retry of the validate-and-commit cycle on a lost race.
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The user tried to check out with nothing in the cart.
    #[error("cart is empty")]
    EmptyCart,

    /// A cart line exceeds the product's current stock (or the product was
    /// archived; `available` is then 0).
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// A cart line references a product with no catalog record.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// The commit lost its race twice; the caller may retry the checkout.
    #[error("checkout conflicted with concurrent stock changes: {0}")]
    Conflict(String),

    /// Deterministic domain rejection while building the commit.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Historical events could not be deserialized.
    #[error("failed to deserialize stored events: {0}")]
    Deserialize(String),

    /// The event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),
}

impl From<DispatchError> for CheckoutError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => CheckoutError::Conflict(msg),
            DispatchError::Validation(msg) => CheckoutError::Validation(msg),
            DispatchError::InvariantViolation(msg) => CheckoutError::Validation(msg),
            DispatchError::NotFound => CheckoutError::Validation("not found".to_string()),
            DispatchError::Deserialize(msg) => CheckoutError::Deserialize(msg),
            DispatchError::Store(e) => CheckoutError::Store(e),
            DispatchError::Publish(msg) => {
                CheckoutError::Store(EventStoreError::Publish(msg))
            }
        }
    }
}

impl From<EventStoreError> for CheckoutError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => CheckoutError::Conflict(msg),
            other => CheckoutError::Store(other),
        }
    }
}

/// Summary of a successfully placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    /// Order total in smallest currency unit.
    pub total: u64,
    pub created_at: DateTime<Utc>,
}

/// The order-placement transaction engine.
///
/// Owns no state of its own; every attempt works from the streams as they
/// are at that moment and commits through the store's batch append.
#[derive(Debug)]
pub struct CheckoutEngine<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CheckoutEngine<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }
}

impl<S, B> CheckoutEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Convert the user's cart into a placed order.
    ///
    /// See the module docs for the state machine and retry policy.
    pub fn place_order(
        &self,
        user_id: UserId,
        delivery: DeliveryInfo,
    ) -> Result<PlacedOrder, CheckoutError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_place(user_id, &delivery) {
                Err(CheckoutError::Conflict(msg)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(user_id = %user_id, attempt, %msg, "checkout raced, revalidating");
                }
                outcome => return outcome,
            }
        }
    }

    /// One validate-and-commit cycle.
    fn try_place(
        &self,
        user_id: UserId,
        delivery: &DeliveryInfo,
    ) -> Result<PlacedOrder, CheckoutError> {
        let now = Utc::now();

        // ── Validating ──────────────────────────────────────────────────
        let cart_id = CartId::for_user(user_id);
        let (cart, cart_version) = load_aggregate(&self.store, cart_id.0, |id| {
            Cart::empty(CartId::new(id))
        })?;

        if !cart.is_opened() || cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        // Lines are processed in insertion order; each touches a distinct
        // product, so no further ordering is needed.
        let mut products = Vec::with_capacity(cart.lines().len());
        for line in cart.lines() {
            let (product, product_version) =
                load_aggregate(&self.store, line.product_id.0, |id| {
                    Product::empty(ProductId::new(id))
                })?;

            if !product.exists() {
                return Err(CheckoutError::ProductNotFound(line.product_id));
            }

            let available = if product.can_be_sold() { product.stock() } else { 0 };
            if line.quantity > available {
                return Err(CheckoutError::InsufficientStock {
                    product_id: line.product_id,
                    requested: line.quantity,
                    available,
                });
            }

            products.push((product, product_version));
        }

        // ── Reserving ───────────────────────────────────────────────────
        let order_id = OrderId::new(AggregateId::new());
        let order = Order::empty(order_id);

        let new_lines: Vec<NewOrderLine> = cart
            .lines()
            .iter()
            .zip(&products)
            .map(|(line, (product, _))| NewOrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                // Price snapshot: copied now, immune to later price changes.
                unit_price: product.unit_price(),
            })
            .collect();

        let order_events = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id,
                delivery: delivery.clone(),
                lines: new_lines,
                occurred_at: now,
            }))
            .map_err(domain_to_checkout)?;

        let mut placed = order;
        for event in &order_events {
            placed.apply(event);
        }

        let mut batches = Vec::with_capacity(products.len() + 2);
        batches.push(StreamAppend::new(
            to_uncommitted(order_id.0, ORDER_AGGREGATE_TYPE, &order_events)?,
            ExpectedVersion::Exact(0),
        ));

        for (line, (product, product_version)) in cart.lines().iter().zip(&products) {
            let decrement_events = product
                .handle(&ProductCommand::DecrementStock(DecrementStock {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    occurred_at: now,
                }))
                .map_err(domain_to_checkout)?;

            batches.push(StreamAppend::new(
                to_uncommitted(line.product_id.0, PRODUCT_AGGREGATE_TYPE, &decrement_events)?,
                ExpectedVersion::Exact(*product_version),
            ));
        }

        let clear_events = cart
            .handle(&CartCommand::ClearCart(ClearCart {
                cart_id,
                occurred_at: now,
            }))
            .map_err(domain_to_checkout)?;
        batches.push(StreamAppend::new(
            to_uncommitted(cart_id.0, CART_AGGREGATE_TYPE, &clear_events)?,
            ExpectedVersion::Exact(cart_version),
        ));

        // ── Committed ───────────────────────────────────────────────────
        // All-or-nothing: any stream that moved since validation fails the
        // whole batch and nothing below runs.
        let committed = self.store.append_batches(batches)?;

        // The order is durable from here on. Publication is at-least-once
        // and projections can be rebuilt from the store, so a publish
        // failure is logged, not surfaced as a checkout failure.
        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    event_type = %stored.event_type,
                    "failed to publish committed checkout event: {e:?}"
                );
            }
        }

        tracing::info!(
            order_id = %order_id,
            user_id = %user_id,
            lines = placed.lines().len(),
            total = placed.total(),
            "order placed"
        );

        Ok(PlacedOrder {
            order_id,
            user_id,
            status: placed.status(),
            lines: placed.lines().to_vec(),
            total: placed.total(),
            created_at: now,
        })
    }
}

fn to_uncommitted<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, CheckoutError>
where
    E: shopfront_events::Event + serde::Serialize,
{
    events
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
                .map_err(CheckoutError::from)
        })
        .collect()
}

fn domain_to_checkout(err: DomainError) -> CheckoutError {
    // Commands issued here were pre-validated; a domain rejection at this
    // point is deterministic and not retryable.
    CheckoutError::Validation(err.to_string())
}
