use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopfront_catalog::ProductId;
use shopfront_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId, ValueObject};
use shopfront_events::Event;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle: pending → shipped → delivered, or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

/// Delivery details captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub full_name: String,
    pub address: String,
    pub phone: String,
}

impl ValueObject for DeliveryInfo {}

impl DeliveryInfo {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.full_name.trim().is_empty() {
            return Err(DomainError::validation("full_name cannot be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(DomainError::validation("address cannot be empty"));
        }
        if self.phone.trim().is_empty() {
            return Err(DomainError::validation("phone cannot be empty"));
        }
        Ok(())
    }
}

/// Order line: product, quantity, and the price at purchase time.
///
/// `unit_price` is a copied value, deliberately decoupled from the product's
/// live price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    /// Price in smallest currency unit (e.g., cents), snapshot at purchase.
    pub unit_price: u64,
}

/// Input line for `PlaceOrder`; line numbers are assigned on placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: u64,
}

/// Aggregate root: Order.
///
/// Placed exactly once and never deleted; afterwards only the status moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    owner: Option<UserId>,
    delivery: Option<DeliveryInfo>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    placed: bool,
}

impl Order {
    /// Create an empty, not-yet-placed aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            owner: None,
            delivery: None,
            status: OrderStatus::Pending,
            lines: Vec::new(),
            created_at: None,
            version: 0,
            placed: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn delivery(&self) -> Option<&DeliveryInfo> {
        self.delivery.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_placed(&self) -> bool {
        self.placed
    }

    /// Order total in smallest currency unit.
    pub fn total(&self) -> u64 {
        self.lines
            .iter()
            .map(|l| l.unit_price * l.quantity as u64)
            .sum()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub delivery: DeliveryInfo,
    pub lines: Vec<NewOrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    MarkShipped(MarkShipped),
    MarkDelivered(MarkDelivered),
    CancelOrder(CancelOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub delivery: DeliveryInfo,
    pub lines: Vec<OrderLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderDelivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderShipped(OrderShipped),
    OrderDelivered(OrderDelivered),
    OrderCancelled(OrderCancelled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderShipped(_) => "orders.order.shipped",
            OrderEvent::OrderDelivered(_) => "orders.order.delivered",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderShipped(e) => e.occurred_at,
            OrderEvent::OrderDelivered(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.owner = Some(e.user_id);
                self.delivery = Some(e.delivery.clone());
                self.status = OrderStatus::Pending;
                self.lines = e.lines.clone();
                self.created_at = Some(e.occurred_at);
                self.placed = true;
            }
            OrderEvent::OrderShipped(_) => {
                self.status = OrderStatus::Shipped;
            }
            OrderEvent::OrderDelivered(_) => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::MarkShipped(cmd) => self.handle_ship(cmd),
            OrderCommand::MarkDelivered(cmd) => self.handle_deliver(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.placed {
            return Err(DomainError::conflict("order already placed"));
        }
        cmd.delivery.validate()?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation("cannot place an order without lines"));
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for (idx, line) in cmd.lines.iter().enumerate() {
            if line.quantity <= 0 {
                return Err(DomainError::validation("quantity must be positive"));
            }
            if line.unit_price == 0 {
                return Err(DomainError::validation("unit_price must be positive"));
            }
            if cmd.lines[..idx].iter().any(|l| l.product_id == line.product_id) {
                return Err(DomainError::invariant(
                    "order lines must be unique per product",
                ));
            }
            lines.push(OrderLine {
                line_no: (idx as u32) + 1,
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            delivery: cmd.delivery.clone(),
            lines,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &MarkShipped) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant("only pending orders can be shipped"));
        }

        Ok(vec![OrderEvent::OrderShipped(OrderShipped {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deliver(&self, cmd: &MarkDelivered) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Shipped {
            return Err(DomainError::invariant(
                "only shipped orders can be delivered",
            ));
        }

        Ok(vec![OrderEvent::OrderDelivered(OrderDelivered {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;

        if self.status != OrderStatus::Pending {
            return Err(DomainError::invariant(
                "only pending orders can be cancelled",
            ));
        }

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order_id() -> OrderId {
        OrderId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_delivery() -> DeliveryInfo {
        DeliveryInfo {
            full_name: "Jordan Petrov".to_string(),
            address: "12 Harbour Lane, Riga".to_string(),
            phone: "+371 20000000".to_string(),
        }
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn placed_order() -> Order {
        let order_id = test_order_id();
        let mut order = Order::empty(order_id);
        let events = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                delivery: test_delivery(),
                lines: vec![NewOrderLine {
                    product_id: test_product_id(),
                    quantity: 3,
                    unit_price: 1250,
                }],
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        order
    }

    #[test]
    fn place_order_snapshots_lines_and_starts_pending() {
        let order = placed_order();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.lines()[0].line_no, 1);
        assert_eq!(order.lines()[0].quantity, 3);
        assert_eq!(order.lines()[0].unit_price, 1250);
        assert_eq!(order.total(), 3750);
        assert!(order.created_at().is_some());
    }

    #[test]
    fn place_rejects_empty_lines() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                delivery: test_delivery(),
                lines: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn place_rejects_blank_delivery_fields() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let mut delivery = test_delivery();
        delivery.address = "   ".to_string();

        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                delivery,
                lines: vec![NewOrderLine {
                    product_id: test_product_id(),
                    quantity: 1,
                    unit_price: 100,
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn place_rejects_duplicate_product_lines() {
        let order_id = test_order_id();
        let order = Order::empty(order_id);
        let product_id = test_product_id();

        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id,
                user_id: UserId::new(),
                delivery: test_delivery(),
                lines: vec![
                    NewOrderLine {
                        product_id,
                        quantity: 1,
                        unit_price: 100,
                    },
                    NewOrderLine {
                        product_id,
                        quantity: 2,
                        unit_price: 100,
                    },
                ],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn order_is_placed_exactly_once() {
        let order = placed_order();
        let err = order
            .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                order_id: order.id_typed(),
                user_id: UserId::new(),
                delivery: test_delivery(),
                lines: vec![NewOrderLine {
                    product_id: test_product_id(),
                    quantity: 1,
                    unit_price: 100,
                }],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn full_lifecycle_pending_to_delivered() {
        let mut order = placed_order();

        let events = order
            .handle(&OrderCommand::MarkShipped(MarkShipped {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), OrderStatus::Shipped);

        let events = order
            .handle(&OrderCommand::MarkDelivered(MarkDelivered {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn delivery_requires_shipment_first() {
        let order = placed_order();
        let err = order
            .handle(&OrderCommand::MarkDelivered(MarkDelivered {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancel_only_from_pending() {
        let mut order = placed_order();

        let events = order
            .handle(&OrderCommand::MarkShipped(MarkShipped {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        let err = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn cancelled_order_keeps_its_lines() {
        let mut order = placed_order();
        let events = order
            .handle(&OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order.apply(&events[0]);

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.lines().len(), 1);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: the order total is the sum over lines of
            /// quantity × snapshot price, whatever the line mix.
            #[test]
            fn total_matches_line_sum(
                inputs in proptest::collection::vec((1i64..50, 1u64..10_000), 1..8)
            ) {
                let order_id = OrderId::new(AggregateId::new());
                let mut order = Order::empty(order_id);

                let lines: Vec<NewOrderLine> = inputs
                    .iter()
                    .map(|(qty, price)| NewOrderLine {
                        product_id: ProductId::new(AggregateId::new()),
                        quantity: *qty,
                        unit_price: *price,
                    })
                    .collect();

                let expected: u64 = inputs
                    .iter()
                    .map(|(qty, price)| price * *qty as u64)
                    .sum();

                let events = order
                    .handle(&OrderCommand::PlaceOrder(PlaceOrder {
                        order_id,
                        user_id: UserId::new(),
                        delivery: DeliveryInfo {
                            full_name: "A B".to_string(),
                            address: "Somewhere 1".to_string(),
                            phone: "+100".to_string(),
                        },
                        lines,
                        occurred_at: Utc::now(),
                    }))
                    .unwrap();
                order.apply(&events[0]);

                prop_assert_eq!(order.total(), expected);
            }
        }
    }
}
