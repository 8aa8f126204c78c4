//! External-system registry, remote login and proxied calls end to end,
//! with the remote system played by an httpmock server.

mod common;

use axum::http::StatusCode;
use httpmock::prelude::*;
use serde_json::{json, Value};

use common::{setup, TestApp};

async fn register(t: &TestApp, token: &str, base_url: &str) -> Value {
    let (status, body) = t
        .post(
            "/api/v1/external-systems",
            Some(token),
            json!({
                "name": "crm",
                "display_name": "CRM",
                "base_url": base_url,
                "auth_url": "/api/auth",
                "username": "svc",
                "password": "s3cret",
                "session_timeout": 900
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    body
}

#[tokio::test]
async fn registry_crud_is_superuser_only() {
    let t = setup().await;
    let admin = t.admin_token().await;
    let alice = t.user_token("alice@example.com").await;

    let (status, _) = t
        .post(
            "/api/v1/external-systems",
            Some(&alice),
            json!({ "name": "x", "base_url": "http://x.test", "username": "u", "password": "p" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let system = register(&t, &admin, "http://crm.test").await;
    assert_eq!(system["auth_status"], "inactive");
    assert_eq!(system["session_timeout"], 900);
    assert_eq!(system["max_retry_count"], 3);
    assert!(system.get("password").is_none());

    // duplicate name
    let (status, _) = t
        .post(
            "/api/v1/external-systems",
            Some(&admin),
            json!({ "name": "crm", "base_url": "http://other.test", "username": "u", "password": "p" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // bad base URL
    let (status, _) = t
        .post(
            "/api/v1/external-systems",
            Some(&admin),
            json!({ "name": "erp", "base_url": "ftp://erp.test", "username": "u", "password": "p" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/v1/external-systems/{}", system["id"]);
    let (status, body) = t.put(&uri, Some(&admin), json!({ "display_name": "Sales CRM" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Sales CRM");
    assert_eq!(body["base_url"], "http://crm.test");

    let (_, list) = t.get("/api/v1/external-systems", Some(&admin)).await;
    assert_eq!(list["total"], 1);

    let (status, _) = t.delete(&uri, Some(&admin)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = t.get(&uri, Some(&admin)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn authenticate_then_call_reuses_the_session() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth").json_body(json!({ "username": "svc", "password": "s3cret" }));
            then.status(200).json_body(json!({ "success": true, "data": { "token": "remote-token" } }));
        })
        .await;
    let orders = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/orders")
                .query_param("status", "open")
                .header("authorization", "Bearer remote-token");
            then.status(200).json_body(json!([{ "id": 1 }, { "id": 2 }]));
        })
        .await;

    let t = setup().await;
    let admin = t.admin_token().await;
    let system = register(&t, &admin, &server.base_url()).await;

    let (status, outcome) = t.post("/api/v1/external-systems/crm/authenticate", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["success"], true);
    assert_eq!(outcome["session_token"], "remote-token");

    let (status, resp) = t
        .post(
            "/api/v1/external-systems/crm/call",
            Some(&admin),
            json!({ "method": "GET", "endpoint": "/orders", "params": { "status": "open" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["status_code"], 200);
    assert_eq!(resp["data"].as_array().unwrap().len(), 2);

    login.assert_hits_async(1).await;
    orders.assert_hits_async(1).await;

    // any active user can read status
    let alice = t.user_token("alice@example.com").await;
    let (status, body) = t.get("/api/v1/external-systems/crm/status", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert_eq!(body["is_session_valid"], true);

    let (status, all) = t.get("/api/v1/external-systems/status", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);

    let (status, _) = t.get("/api/v1/external-systems/erp/status", Some(&alice)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // one login, one call
    let (status, logs) = t.get(&format!("/api/v1/external-systems/{}/logs", system["id"]), Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 2);
    let serialized = logs.to_string();
    assert!(!serialized.contains("s3cret"));
}

#[tokio::test]
async fn failed_authentication_is_a_bad_request() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth");
            then.status(401).json_body(json!({ "message": "invalid credentials" }));
        })
        .await;

    let t = setup().await;
    let admin = t.admin_token().await;
    register(&t, &admin, &server.base_url()).await;

    let (status, body) = t.post("/api/v1/external-systems/crm/authenticate", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid credentials");

    let (_, body) = t.get("/api/v1/external-systems/crm/status", Some(&admin)).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["last_error"], "invalid credentials");

    let (status, _) = t.post("/api/v1/external-systems/ghost/authenticate", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn authenticate_all_summarizes_active_systems() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/auth");
            then.status(200).json_body(json!({ "token": "t" }));
        })
        .await;

    let t = setup().await;
    let admin = t.admin_token().await;
    register(&t, &admin, &server.base_url()).await;
    t.post(
        "/api/v1/external-systems",
        Some(&admin),
        json!({
            "name": "legacy",
            "base_url": "http://127.0.0.1:9",
            "username": "u",
            "password": "p",
            "is_active": false
        }),
    )
    .await;

    let (status, body) = t.post("/api/v1/external-systems/authenticate-all", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_systems"], 1);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["failed_count"], 0);

    let (_, all) = t.get("/api/v1/external-systems/status", Some(&admin)).await;
    let names: Vec<&str> = all.as_array().unwrap().iter().filter_map(|s| s["system_name"].as_str()).collect();
    assert_eq!(names, ["crm"]);
}

#[tokio::test]
async fn unsupported_methods_are_rejected() {
    let t = setup().await;
    let admin = t.admin_token().await;
    register(&t, &admin, "http://127.0.0.1:9").await;

    let (status, _) = t
        .post("/api/v1/external-systems/crm/call", Some(&admin), json!({ "method": "PATCH", "endpoint": "/x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_timeout_and_retry_count_are_bounded() {
    let t = setup().await;
    let admin = t.admin_token().await;

    for timeout in [json!(0), json!(-5), json!(31_536_001), json!(4_611_686_018_427_387_903i64)] {
        let (status, body) = t
            .post(
                "/api/v1/external-systems",
                Some(&admin),
                json!({
                    "name": "crm",
                    "base_url": "http://crm.test",
                    "username": "u",
                    "password": "p",
                    "session_timeout": timeout
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "session_timeout {} accepted", timeout);
        assert!(body["error"].as_str().unwrap().contains("session_timeout"));
    }

    let (status, _) = t
        .post(
            "/api/v1/external-systems",
            Some(&admin),
            json!({ "name": "crm", "base_url": "http://crm.test", "username": "u", "password": "p", "max_retry_count": -1 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let system = register(&t, &admin, "http://crm.test").await;
    let uri = format!("/api/v1/external-systems/{}", system["id"]);

    let (status, _) = t.put(&uri, Some(&admin), json!({ "session_timeout": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = t.put(&uri, Some(&admin), json!({ "max_retry_count": 1000 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t.put(&uri, Some(&admin), json!({ "session_timeout": 31_536_000, "max_retry_count": 0 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_timeout"], 31_536_000);
    assert_eq!(body["max_retry_count"], 0);
}
