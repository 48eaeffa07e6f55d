use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Form, Json, Router};

use crate::error::AppResult;
use crate::models::{LoginForm, Token, UserCreate};

use super::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

async fn register(
    State(state): State<AppState>,
    Json(input): Json<UserCreate>,
) -> AppResult<(StatusCode, Json<Token>)> {
    let token = state.auth.register(input).await?;
    Ok((StatusCode::CREATED, Json(token)))
}

async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> AppResult<Json<Token>> {
    let token = state.auth.login(form).await?;
    Ok(Json(token))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;

    fn login_request(username: &str, password: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("username={username}&password={password}")))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let app = app();
        let body = json!({ "email": "a@x.com", "password": "p1" });

        let (status, first) = send(&app, json_request("POST", "/api/v1/register", None, body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["token_type"], "bearer");
        assert!(first["access_token"].as_str().is_some());

        let (status, second) = send(&app, json_request("POST", "/api/v1/register", None, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(second["detail"], "Email already registered");
    }

    #[tokio::test]
    async fn test_login() {
        let app = app();
        register(&app, "a@x.com", "p1").await;

        let (status, body) = send(&app, login_request("a%40x.com", "p1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");
    }

    #[tokio::test]
    async fn test_login_wrong_password_is_401() {
        let app = app();
        register(&app, "a@x.com", "p1").await;

        let resp = tower::ServiceExt::oneshot(app.clone(), login_request("a%40x.com", "wrong"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let (status, unknown) = send(&app, login_request("nobody%40x.com", "p1")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown["detail"], "Incorrect credentials");
    }
}
