//! Request/response DTOs and JSON mapping helpers.

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use shopfront_infra::cart_service::CartView;
use shopfront_infra::checkout::PlacedOrder;
use shopfront_infra::projections::catalog::ProductReadModel;
use shopfront_infra::projections::order_history::OrderReadModel;

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    pub initial_stock: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetPriceRequest {
    pub unit_price: u64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddCartLineRequest {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub full_name: String,
    pub address: String,
    pub phone: String,
}

pub fn product_to_json(rm: ProductReadModel) -> JsonValue {
    json!({
        "id": rm.product_id.to_string(),
        "name": rm.name,
        "description": rm.description,
        "category": rm.category,
        "unit_price": rm.unit_price,
        "stock": rm.stock,
        "archived": rm.archived,
    })
}

pub fn cart_view_to_json(view: CartView) -> JsonValue {
    json!({
        "lines": view
            .lines
            .iter()
            .map(|l| json!({
                "product_id": l.product_id.to_string(),
                "name": l.name,
                "quantity": l.quantity,
                "unit_price": l.unit_price,
                "line_total": l.line_total,
            }))
            .collect::<Vec<_>>(),
        "total": view.total,
    })
}

pub fn order_to_json(rm: OrderReadModel) -> JsonValue {
    json!({
        "id": rm.order_id.to_string(),
        "status": status_str(rm.status),
        "full_name": rm.full_name,
        "address": rm.address,
        "phone": rm.phone,
        "created_at": rm.created_at.to_rfc3339(),
        "lines": rm
            .lines
            .iter()
            .map(|l| json!({
                "line_no": l.line_no,
                "product_id": l.product_id.to_string(),
                "quantity": l.quantity,
                "unit_price": l.unit_price,
            }))
            .collect::<Vec<_>>(),
        "total": rm.total,
    })
}

pub fn placed_order_to_json(placed: PlacedOrder) -> JsonValue {
    json!({
        "id": placed.order_id.to_string(),
        "status": status_str(placed.status),
        "created_at": placed.created_at.to_rfc3339(),
        "lines": placed
            .lines
            .iter()
            .map(|l| json!({
                "line_no": l.line_no,
                "product_id": l.product_id.to_string(),
                "quantity": l.quantity,
                "unit_price": l.unit_price,
            }))
            .collect::<Vec<_>>(),
        "total": placed.total,
    })
}

fn status_str(status: shopfront_orders::OrderStatus) -> &'static str {
    match status {
        shopfront_orders::OrderStatus::Pending => "pending",
        shopfront_orders::OrderStatus::Shipped => "shipped",
        shopfront_orders::OrderStatus::Delivered => "delivered",
        shopfront_orders::OrderStatus::Cancelled => "cancelled",
    }
}
