use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use shopfront_catalog::{
    AdjustStock, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, SetPrice,
};
use shopfront_core::AggregateId;
use shopfront_infra::checkout::PRODUCT_AGGREGATE_TYPE;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Catalog browse: readable without authentication, served from the
/// catalog projection.
pub fn public_router() -> Router {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(get_product))
}

/// Catalog tooling: create/price/restock/archive. Authenticated; this is
/// the restock tooling entrypoint, not a storefront surface.
pub fn admin_router() -> Router {
    Router::new()
        .route("/admin/products", post(create_product))
        .route("/admin/products/:id/price", post(set_price))
        .route("/admin/products/:id/adjust-stock", post(adjust_stock))
        .route("/admin/products/:id/archive", post(archive_product))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let items = services
        .catalog()
        .list()
        .into_iter()
        .filter(|p| !p.archived)
        .map(dto::product_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };
    match services.catalog().get(&ProductId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();
    let product_id = ProductId::new(agg);

    let cmd = ProductCommand::CreateProduct(CreateProduct {
        product_id,
        name: body.name,
        description: body.description,
        category: body.category,
        unit_price: body.unit_price,
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<Product>(agg, PRODUCT_AGGREGATE_TYPE, cmd, |id| {
        Product::empty(ProductId::new(id))
    }) {
        return errors::dispatch_error_to_response(e);
    }

    if let Some(stock) = body.initial_stock.filter(|s| *s > 0) {
        let cmd = ProductCommand::AdjustStock(AdjustStock {
            product_id,
            delta: stock,
            occurred_at: Utc::now(),
        });
        if let Err(e) = services.dispatch::<Product>(agg, PRODUCT_AGGREGATE_TYPE, cmd, |id| {
            Product::empty(ProductId::new(id))
        }) {
            return errors::dispatch_error_to_response(e);
        }
    }

    (
        StatusCode::CREATED,
        Json(serde_json::json!({"id": agg.to_string()})),
    )
        .into_response()
}

pub async fn set_price(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetPriceRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };

    let cmd = ProductCommand::SetPrice(SetPrice {
        product_id: ProductId::new(agg),
        unit_price: body.unit_price,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Product>(agg, PRODUCT_AGGREGATE_TYPE, cmd, |id| {
        Product::empty(ProductId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };

    let cmd = ProductCommand::AdjustStock(AdjustStock {
        product_id: ProductId::new(agg),
        delta: body.delta,
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Product>(agg, PRODUCT_AGGREGATE_TYPE, cmd, |id| {
        Product::empty(ProductId::new(id))
    }) {
        Ok(committed) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": agg.to_string(), "events_committed": committed.len()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg: AggregateId = match id.parse() {
        Ok(v) => v,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid product id");
        }
    };

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });

    match services.dispatch::<Product>(agg, PRODUCT_AGGREGATE_TYPE, cmd, |id| {
        Product::empty(ProductId::new(id))
    }) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"id": agg.to_string()})),
        )
            .into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
