//! HTTP surface: router, shared state and handlers.

pub mod auth;
pub mod health;
pub mod sync;
pub mod users;

use axum::extract::FromRef;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::{AuthService, HealthService, UserService};

pub use sync::SyncState;

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub auth: AuthService,
    pub health: HealthService,
    pub sync: SyncState,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    Router::new()
        .merge(health::routes())
        .nest("/api/v1", auth::routes())
        .merge(users::routes())
        .merge(sync::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
