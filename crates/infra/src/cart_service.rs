//! Cart operations: explicit lazy creation, guarded line adds, cart views.
//!
//! The stock ceiling enforced here is a *soft* invariant: stock can move
//! between an add and the eventual checkout, so this check only keeps carts
//! honest at mutation time. The authoritative re-check lives in the checkout
//! engine, which pins product versions inside the commit.

use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopfront_cart::{AddLine, Cart, CartCommand, CartId, CartLine, OpenCart};
use shopfront_catalog::{Product, ProductId};
use shopfront_core::UserId;
use shopfront_events::{EventBus, EventEnvelope};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, load_aggregate};
use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum CartServiceError {
    /// The referenced product has no catalog record.
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),

    /// Accepting the add would take the line past the product's current
    /// stock (archived products count as zero available).
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: i64,
        available: i64,
    },

    /// Deterministic domain rejection (bad quantity, etc.).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Concurrent cart mutation; safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Historical events could not be deserialized.
    #[error("failed to deserialize stored events: {0}")]
    Deserialize(String),

    /// The event store failed.
    #[error("event store failure: {0}")]
    Store(EventStoreError),
}

impl From<DispatchError> for CartServiceError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => CartServiceError::Conflict(msg),
            DispatchError::Validation(msg) => CartServiceError::Validation(msg),
            DispatchError::InvariantViolation(msg) => CartServiceError::Validation(msg),
            DispatchError::NotFound => CartServiceError::Validation("not found".to_string()),
            DispatchError::Deserialize(msg) => CartServiceError::Deserialize(msg),
            DispatchError::Store(e) => CartServiceError::Store(e),
            DispatchError::Publish(msg) => CartServiceError::Store(EventStoreError::Publish(msg)),
        }
    }
}

/// One line of a cart view, priced at the product's *current* price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartViewLine {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: i64,
    /// Current price in smallest currency unit.
    pub unit_price: u64,
    pub line_total: u64,
}

/// A cart as presented to the user: ordered lines plus the computed total.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CartView {
    pub lines: Vec<CartViewLine>,
    pub total: u64,
}

/// Application service for cart operations.
#[derive(Debug)]
pub struct CartService<S, B> {
    store: S,
    dispatcher: CommandDispatcher<S, B>,
}

impl<S, B> CartService<S, B>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store: store.clone(),
            dispatcher: CommandDispatcher::new(store, bus),
        }
    }

    /// The user's cart, opened on first use.
    ///
    /// Cart creation is deliberately an explicit operation rather than a
    /// side effect hidden in `add_line`, so the lifecycle stays visible.
    pub fn get_or_create(&self, user_id: UserId) -> Result<Cart, CartServiceError> {
        let cart_id = CartId::for_user(user_id);
        let (cart, _) = load_aggregate(&self.store, cart_id.0, |id| Cart::empty(CartId::new(id)))?;
        if cart.is_opened() {
            return Ok(cart);
        }

        self.dispatcher.dispatch::<Cart>(
            cart_id.0,
            crate::checkout::CART_AGGREGATE_TYPE,
            CartCommand::OpenCart(OpenCart {
                cart_id,
                user_id,
                occurred_at: Utc::now(),
            }),
            |id| Cart::empty(CartId::new(id)),
        )?;

        let (cart, _) = load_aggregate(&self.store, cart_id.0, |id| Cart::empty(CartId::new(id)))?;
        Ok(cart)
    }

    /// Add `quantity` of a product to the user's cart (creating or
    /// incrementing the matching line) and return the updated line.
    pub fn add_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
    ) -> Result<CartLine, CartServiceError> {
        if quantity <= 0 {
            return Err(CartServiceError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        let product = self.load_product(product_id)?;
        let cart = self.get_or_create(user_id)?;

        let existing = cart.line_quantity(product_id);
        let requested = existing + quantity;
        let available = if product.can_be_sold() { product.stock() } else { 0 };
        if requested > available {
            return Err(CartServiceError::InsufficientStock {
                product_id,
                requested,
                available,
            });
        }

        let cart_id = cart.id_typed();
        self.dispatcher.dispatch::<Cart>(
            cart_id.0,
            crate::checkout::CART_AGGREGATE_TYPE,
            CartCommand::AddLine(AddLine {
                cart_id,
                product_id,
                quantity,
                occurred_at: Utc::now(),
            }),
            |id| Cart::empty(CartId::new(id)),
        )?;

        Ok(CartLine {
            product_id,
            quantity: requested,
        })
    }

    /// The user's cart with a total computed at current prices.
    ///
    /// A cart that was never opened is an empty view, not an error.
    pub fn view_cart(&self, user_id: UserId) -> Result<CartView, CartServiceError> {
        let cart_id = CartId::for_user(user_id);
        let (cart, _) = load_aggregate(&self.store, cart_id.0, |id| Cart::empty(CartId::new(id)))?;
        if !cart.is_opened() {
            return Ok(CartView::default());
        }

        let mut lines = Vec::with_capacity(cart.lines().len());
        let mut total = 0u64;
        for line in cart.lines() {
            let product = self.load_product(line.product_id)?;
            let line_total = product.unit_price() * line.quantity as u64;
            total += line_total;
            lines.push(CartViewLine {
                product_id: line.product_id,
                name: product.name().to_string(),
                quantity: line.quantity,
                unit_price: product.unit_price(),
                line_total,
            });
        }

        Ok(CartView { lines, total })
    }

    fn load_product(&self, product_id: ProductId) -> Result<Product, CartServiceError> {
        let (product, _) =
            load_aggregate(&self.store, product_id.0, |id| Product::empty(ProductId::new(id)))?;
        if !product.exists() {
            return Err(CartServiceError::ProductNotFound(product_id));
        }
        Ok(product)
    }
}
