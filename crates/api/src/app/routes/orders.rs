use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use shopfront_core::AggregateId;
use shopfront_infra::checkout::ORDER_AGGREGATE_TYPE;
use shopfront_orders::{
    CancelOrder, DeliveryInfo, MarkDelivered, MarkShipped, Order, OrderCommand, OrderId,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/checkout", post(checkout))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/ship", post(mark_shipped))
        .route("/orders/:id/deliver", post(mark_delivered))
        .route("/orders/:id/cancel", post(cancel_order))
}

pub async fn checkout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::CheckoutRequest>,
) -> axum::response::Response {
    let delivery = DeliveryInfo {
        full_name: body.full_name,
        address: body.address,
        phone: body.phone,
    };

    match services.checkout().place_order(user.user_id(), delivery) {
        Ok(placed) => {
            (StatusCode::CREATED, Json(dto::placed_order_to_json(placed))).into_response()
        }
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    let items = services
        .order_history()
        .list_for_user(user.user_id())
        .into_iter()
        .map(dto::order_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.order_history().get(&order_id) {
        Some(rm) if rm.user_id == user.user_id() => {
            (StatusCode::OK, Json(dto::order_to_json(rm))).into_response()
        }
        _ => errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found"),
    }
}

pub async fn mark_shipped(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    status_transition(&services, &user, &id, |order_id| {
        OrderCommand::MarkShipped(MarkShipped {
            order_id,
            occurred_at: Utc::now(),
        })
    })
}

pub async fn mark_delivered(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    status_transition(&services, &user, &id, |order_id| {
        OrderCommand::MarkDelivered(MarkDelivered {
            order_id,
            occurred_at: Utc::now(),
        })
    })
}

pub async fn cancel_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    status_transition(&services, &user, &id, |order_id| {
        OrderCommand::CancelOrder(CancelOrder {
            order_id,
            occurred_at: Utc::now(),
        })
    })
}

/// Shared guard + dispatch for status transitions: the order must exist and
/// belong to the caller; the aggregate enforces the transition rules.
fn status_transition(
    services: &AppServices,
    user: &UserContext,
    raw_id: &str,
    make_command: impl FnOnce(OrderId) -> OrderCommand,
) -> axum::response::Response {
    let order_id = match parse_order_id(raw_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let order = match services.load_order(order_id) {
        Ok(order) => order,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if !order.is_placed() || order.owner() != Some(user.user_id()) {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "order not found");
    }

    match services.dispatch::<Order>(
        order_id.0,
        ORDER_AGGREGATE_TYPE,
        make_command(order_id),
        |id| Order::empty(OrderId::new(id)),
    ) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": order_id.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

fn parse_order_id(raw: &str) -> Result<OrderId, axum::response::Response> {
    let agg: AggregateId = raw.parse().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id")
    })?;
    Ok(OrderId::new(agg))
}
