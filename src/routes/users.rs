use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::middleware::AuthenticatedUser;
use crate::models::{UserCreate, UserResponse, UserUpdate};

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/", post(create_user))
        .route(
            "/users/:user_id",
            get(read_user).put(update_user).delete(delete_user),
        )
}

async fn create_user(
    AuthenticatedUser(_caller): AuthenticatedUser,
    State(state): State<AppState>,
    Json(input): Json<UserCreate>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let user = state.users.create(input).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn read_user(
    AuthenticatedUser(_caller): AuthenticatedUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<UserResponse>> {
    let user = state.users.get(user_id).await?;
    Ok(Json(user.into()))
}

async fn update_user(
    AuthenticatedUser(_caller): AuthenticatedUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(patch): Json<UserUpdate>,
) -> AppResult<Json<UserResponse>> {
    let existing = state.users.get(user_id).await?;
    let user = state.users.update(existing, patch).await?;
    Ok(Json(user.into()))
}

async fn delete_user(
    AuthenticatedUser(_caller): AuthenticatedUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Value>> {
    let existing = state.users.get(user_id).await?;
    state.users.delete(&existing).await?;
    Ok(Json(json!({ "message": "User deleted" })))
}
