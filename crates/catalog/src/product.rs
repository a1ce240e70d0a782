use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfront_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use shopfront_events::Event;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Product.
///
/// Carries the sellable state of one catalog item: display fields, the
/// current unit price, and the stock counter the checkout engine decrements.
/// Products are never deleted; archiving takes them off sale while order
/// lines that reference them stay valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    description: Option<String>,
    category: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    unit_price: u64,
    stock: i64,
    archived: bool,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            description: None,
            category: None,
            unit_price: 0,
            stock: 0,
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn stock(&self) -> i64 {
        self.stock
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Whether the product can appear on a new order line.
    pub fn can_be_sold(&self) -> bool {
        self.created && !self.archived
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetPrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetPrice {
    pub product_id: ProductId,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (restock tooling; signed delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecrementStock (checkout path; positive quantity sold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementStock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    SetPrice(SetPrice),
    AdjustStock(AdjustStock),
    DecrementStock(DecrementStock),
    ArchiveProduct(ArchiveProduct),
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PriceChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChanged {
    pub product_id: ProductId,
    pub unit_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
///
/// Emitted for both restocks (positive delta) and sales (negative delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub product_id: ProductId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    PriceChanged(PriceChanged),
    StockAdjusted(StockAdjusted),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::PriceChanged(_) => "catalog.product.price_changed",
            ProductEvent::StockAdjusted(_) => "catalog.product.stock_adjusted",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::PriceChanged(e) => e.occurred_at,
            ProductEvent::StockAdjusted(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.category = e.category.clone();
                self.unit_price = e.unit_price;
                self.stock = 0;
                self.archived = false;
                self.created = true;
            }
            ProductEvent::PriceChanged(e) => {
                self.unit_price = e.unit_price;
            }
            ProductEvent::StockAdjusted(e) => {
                self.stock += e.delta;
            }
            ProductEvent::ProductArchived(_) => {
                self.archived = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::SetPrice(cmd) => self.handle_set_price(cmd),
            ProductCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            ProductCommand::DecrementStock(cmd) => self.handle_decrement(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            description: cmd.description.clone(),
            category: cmd.category.clone(),
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_price(&self, cmd: &SetPrice) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        Ok(vec![ProductEvent::PriceChanged(PriceChanged {
            product_id: cmd.product_id,
            unit_price: cmd.unit_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if self.archived {
            return Err(DomainError::invariant(
                "cannot adjust stock of an archived product",
            ));
        }
        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let new_stock = self.stock + cmd.delta;
        if new_stock < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        Ok(vec![ProductEvent::StockAdjusted(StockAdjusted {
            product_id: cmd.product_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decrement(&self, cmd: &DecrementStock) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if !self.can_be_sold() {
            return Err(DomainError::invariant("archived products cannot be sold"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if self.stock - cmd.quantity < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }

        Ok(vec![ProductEvent::StockAdjusted(StockAdjusted {
            product_id: cmd.product_id,
            delta: -cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if self.archived {
            return Err(DomainError::conflict("product already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
