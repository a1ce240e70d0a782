use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
}
