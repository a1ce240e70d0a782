use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use shopfront_infra::cart_service::CartServiceError;
use shopfront_infra::checkout::CheckoutError;
use shopfront_infra::command_dispatcher::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

pub fn checkout_error_to_response(err: CheckoutError) -> axum::response::Response {
    match err {
        CheckoutError::EmptyCart => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "empty_cart", "cart is empty")
        }
        CheckoutError::InsufficientStock {
            product_id,
            requested,
            available,
        } => insufficient_stock(product_id.to_string(), requested, available),
        CheckoutError::ProductNotFound(product_id) => json_error(
            StatusCode::NOT_FOUND,
            "product_not_found",
            format!("product not found: {product_id}"),
        ),
        CheckoutError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        CheckoutError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        CheckoutError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        CheckoutError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
    }
}

pub fn cart_error_to_response(err: CartServiceError) -> axum::response::Response {
    match err {
        CartServiceError::ProductNotFound(product_id) => json_error(
            StatusCode::NOT_FOUND,
            "product_not_found",
            format!("product not found: {product_id}"),
        ),
        CartServiceError::InsufficientStock {
            product_id,
            requested,
            available,
        } => insufficient_stock(product_id.to_string(), requested, available),
        CartServiceError::Validation(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        CartServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        CartServiceError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        CartServiceError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
    }
}

/// Insufficient-stock responses carry the remaining-stock detail so the user
/// can adjust the quantity.
fn insufficient_stock(product_id: String, requested: i64, available: i64) -> axum::response::Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "error": "insufficient_stock",
            "message": format!(
                "insufficient stock for product {product_id}: requested {requested}, available {available}"
            ),
            "product_id": product_id,
            "requested": requested,
            "available": available,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
