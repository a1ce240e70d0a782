use axum::Router;

pub mod cart;
pub mod catalog;
pub mod orders;
pub mod system;

/// Routes served without authentication: liveness + catalog browse.
pub fn public_router() -> Router {
    Router::new()
        .merge(system::router())
        .merge(catalog::public_router())
}

/// Routes that require an authenticated user.
pub fn protected_router() -> Router {
    Router::new()
        .merge(catalog::admin_router())
        .merge(cart::router())
        .merge(orders::router())
}
