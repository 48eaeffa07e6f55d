use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/healthcheck", get(healthcheck))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the PyME Reporter API!" }))
}

async fn healthcheck(State(state): State<AppState>) -> Response {
    match state.health.check().await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "Database connection error" })),
        )
            .into_response(),
    }
}
