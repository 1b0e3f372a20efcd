#![allow(dead_code)]

use account_shop_core::adapters::InMemoryDepositRepository;
use account_shop_core::config::Config;
use account_shop_core::payments::signature::sign_hex;
use account_shop_core::{create_app, AppState};
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bigdecimal::BigDecimal;
use serde_json::Value;
use std::sync::Arc;

pub const WEBHOOK_SECRET: &str = "test_secret_key";
pub const CASSO_SECRET: &str = "casso_secret_key";
pub const ADMIN_KEY: &str = "admin-secret-key";
pub const BANK_ACCOUNT: &str = "1234567890";

pub fn test_config() -> Config {
    let mut config = Config::with_defaults("postgres://localhost/account_shop_test", BANK_ACCOUNT);
    config.provider.secret_key = Some(WEBHOOK_SECRET.to_string());
    config.casso_webhook_secret = Some(CASSO_SECRET.to_string());
    config.admin_api_key = Some(ADMIN_KEY.to_string());
    config
}

pub struct TestApp {
    pub repo: Arc<InMemoryDepositRepository>,
    pub state: AppState,
    pub router: Router,
}

/// Router over an in-memory repository with `users` registered at zero balance.
pub async fn test_app(users: &[i64]) -> TestApp {
    let repo = Arc::new(InMemoryDepositRepository::new());
    for user in users {
        repo.add_user(*user, BigDecimal::from(0)).await;
    }
    let state = AppState::new(&test_config(), repo.clone()).expect("template QR builder");
    let router = create_app(state.clone());
    TestApp { repo, state, router }
}

pub fn signed_post(uri: &str, header: &str, secret: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header(header, sign_hex(secret, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
