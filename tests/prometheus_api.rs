//! Prometheus proxy endpoints and third-party collection controls, with
//! Prometheus, the Pushgateway and the third-party API mocked.

mod common;

use axum::http::StatusCode;
use httpmock::prelude::*;
use serde_json::json;

use common::{setup, setup_with};
use opsdesk::config::ApiSourceConfig;

#[tokio::test]
async fn health_is_public_and_reports_prometheus_state() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/-/healthy");
            then.status(200).body("Prometheus Server is Healthy.");
        })
        .await;

    let t = setup_with(|cfg| cfg.prometheus.url = server.base_url()).await;
    let (status, body) = t.get("/api/v1/prometheus/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["prometheus_url"], server.base_url());
}

#[tokio::test]
async fn query_get_and_post_forward_promql() {
    let server = MockServer::start_async().await;
    let up = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/query").query_param("query", "up");
            then.status(200).json_body(json!({
                "status": "success",
                "data": { "resultType": "vector", "result": [{ "metric": {}, "value": [1, "1"] }] }
            }));
        })
        .await;

    let t = setup_with(|cfg| cfg.prometheus.url = server.base_url()).await;
    let token = t.user_token("alice@example.com").await;

    let (status, body) = t.get("/api/v1/prometheus/query?query=up", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["result"].as_array().unwrap().len(), 1);

    let (status, _) = t.post("/api/v1/prometheus/query", Some(&token), json!({ "query": "up" })).await;
    assert_eq!(status, StatusCode::OK);
    up.assert_hits_async(2).await;

    let (status, _) = t.post("/api/v1/prometheus/query", Some(&token), json!({ "query": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.get("/api/v1/prometheus/query?query=up", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn range_queries_default_step_and_reject_inverted_windows() {
    let server = MockServer::start_async().await;
    let range = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/query_range").query_param("step", "15s");
            then.status(200).json_body(json!({ "status": "success", "data": { "result": [] } }));
        })
        .await;

    let t = setup_with(|cfg| cfg.prometheus.url = server.base_url()).await;
    let token = t.user_token("alice@example.com").await;

    let (status, body) = t
        .post(
            "/api/v1/prometheus/query_range",
            Some(&token),
            json!({ "query": "up", "start": "2024-01-01T00:00:00Z", "end": "2024-01-01T01:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "15s");
    range.assert_async().await;

    let (status, _) = t
        .post(
            "/api/v1/prometheus/query_range",
            Some(&token),
            json!({ "query": "up", "start": "2024-01-02T00:00:00Z", "end": "2024-01-01T00:00:00Z" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_prometheus_is_reported_not_raised() {
    let t = setup_with(|cfg| cfg.prometheus.url = "http://127.0.0.1:9".to_string()).await;
    let token = t.user_token("alice@example.com").await;

    let (status, body) = t.get("/api/v1/prometheus/targets", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn quick_queries_know_their_kinds() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/query");
            then.status(200).json_body(json!({ "status": "success", "data": { "result": [] } }));
        })
        .await;

    let t = setup_with(|cfg| cfg.prometheus.url = server.base_url()).await;
    let token = t.user_token("alice@example.com").await;

    let (status, body) = t.get("/api/v1/prometheus/quick/uptime", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metric_type"], "uptime");

    let (status, _) = t.get("/api/v1/prometheus/quick/disk_usage", Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn collection_config_can_be_toggled() {
    let t = setup().await;
    let admin = t.admin_token().await;
    let alice = t.user_token("alice@example.com").await;

    let (status, body) = t.get("/api/v1/third-party/config", Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apis"][0]["name"], "local_api");
    assert_eq!(body["apis"][0]["enabled"], false);

    let (status, _) = t.put("/api/v1/third-party/config/local_api/enable", Some(&alice), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.put("/api/v1/third-party/config/local_api/enable", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);

    let (_, body) = t.get("/api/v1/third-party/status", Some(&alice)).await;
    assert_eq!(body["enabled_apis"], 1);
    assert_eq!(body["enabled_api_names"][0], "local_api");

    let (status, _) = t.put("/api/v1/third-party/config/nope/disable", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn collecting_one_api_pushes_to_the_gateway() {
    let api = MockServer::start_async().await;
    let source = api
        .mock_async(|when, then| {
            when.method(GET).path("/price").query_param("ids", "bitcoin");
            then.status(200).json_body(json!({ "bitcoin": { "usd": 65000.5 } }));
        })
        .await;

    let gateway = MockServer::start_async().await;
    let push = gateway
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/metrics/job/third_party_crypto/api_name/crypto")
                .body_contains("business_bitcoin_usd");
            then.status(200);
        })
        .await;

    let t = setup_with(|cfg| {
        cfg.collector.apis = vec![ApiSourceConfig {
            name: "crypto".to_string(),
            url: format!("{}/price", api.base_url()),
            params: [("ids".to_string(), "bitcoin".to_string())].into_iter().collect(),
            interval_secs: 60,
            enabled: true,
        }];
        cfg.pushgateway.url = Some(gateway.base_url());
    })
    .await;
    let admin = t.admin_token().await;

    let (status, body) = t.post("/api/v1/third-party/collect/crypto", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], "sync_execution");
    source.assert_async().await;
    push.assert_async().await;

    let (status, _) = t.post("/api/v1/third-party/collect/unknown", Some(&admin), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
