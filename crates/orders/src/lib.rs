//! `shopfront-orders` — placed order domain (immutable audit records).

pub mod order;

pub use order::{
    CancelOrder, DeliveryInfo, MarkDelivered, MarkShipped, NewOrderLine, Order, OrderCancelled,
    OrderCommand, OrderDelivered, OrderEvent, OrderId, OrderLine, OrderPlaced, OrderShipped,
    OrderStatus, PlaceOrder,
};
