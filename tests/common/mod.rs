//! Shared helpers for the API integration tests.
//!
//! Every test builds its own app over a fresh in-memory database with the
//! default superuser seeded, and drives it with `oneshot` requests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use opsdesk::api::{build_app, build_state, AppState};
use opsdesk::config::Config;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin123";

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
}

pub async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

/// Build the app after letting the caller adjust the configuration.
pub async fn setup_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    let mut cfg = Config::default();
    // no network access from tests unless a test points a source at a mock
    cfg.collector.apis = vec![opsdesk::config::ApiSourceConfig {
        name: "local_api".to_string(),
        url: "http://127.0.0.1:9/unreachable".to_string(),
        params: Default::default(),
        interval_secs: 60,
        enabled: false,
    }];
    adjust(&mut cfg);

    let db = opsdesk::db::memory().await.expect("in-memory database");
    opsdesk::db::seed_superuser(&db, &cfg).await.expect("seed superuser");
    let state = build_state(&cfg, db).await.expect("app state");
    let app = build_app(state.clone(), tower_http::cors::CorsLayer::new());
    TestApp { app, state }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, token, Some(body))).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::PUT, uri, token, Some(body))).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::DELETE, uri, token, None)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .post("/api/v1/auth/login-json", None, json!({ "email": email, "password": password }))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["access_token"].as_str().expect("access_token").to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Register a regular account and return its access token.
    pub async fn user_token(&self, email: &str) -> String {
        let (status, body) = self
            .post("/api/v1/auth/register", None, json!({ "email": email, "password": "password123" }))
            .await;
        assert_eq!(status, StatusCode::OK, "register failed: {}", body);
        self.login(email, "password123").await
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}
