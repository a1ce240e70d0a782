use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use shopfront_catalog::ProductId;
use shopfront_core::AggregateId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/cart", get(view_cart))
        .route("/cart/lines", post(add_line))
}

pub async fn view_cart(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.cart().view_cart(user.user_id()) {
        Ok(view) => (StatusCode::OK, Json(dto::cart_view_to_json(view))).into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::AddCartLineRequest>,
) -> axum::response::Response {
    let product_agg: AggregateId = match body.product_id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };

    match services
        .cart()
        .add_line(user.user_id(), ProductId::new(product_agg), body.quantity)
    {
        Ok(line) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "product_id": line.product_id.to_string(),
                "quantity": line.quantity,
            })),
        )
            .into_response(),
        Err(e) => errors::cart_error_to_response(e),
    }
}
