use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::config::PrometheusConfig;

const HEALTH_TIMEOUT_SECS: u64 = 5;

const APPLICATION_QUERIES: &[(&str, &str)] = &[
    ("http_requests_total", "sum(rate(http_requests_total[5m])) by (method, endpoint)"),
    ("http_request_duration", "histogram_quantile(0.95, rate(http_request_duration_seconds_bucket[5m]))"),
    ("memory_usage", "process_resident_memory_bytes"),
    ("cpu_usage", "rate(process_cpu_seconds_total[5m])"),
    ("active_connections", "http_requests_currently_active"),
];

const SYSTEM_QUERIES: &[(&str, &str)] = &[
    ("process_start_time", "process_start_time_seconds"),
    ("open_fds", "process_open_fds"),
    ("virtual_memory", "process_virtual_memory_bytes"),
    ("uptime", "time() - process_start_time_seconds"),
];

/// PromQL behind the `/quick/{kind}` shortcuts.
pub fn quick_query(kind: &str) -> Option<&'static str> {
    match kind {
        "cpu_usage" => Some("rate(process_cpu_seconds_total[5m])"),
        "memory_usage" => Some("process_resident_memory_bytes"),
        "http_requests_rate" => Some("sum(rate(http_requests_total[5m]))"),
        "uptime" => Some("time() - process_start_time_seconds"),
        _ => None,
    }
}

/// Thin wrapper over the Prometheus HTTP API.
///
/// Every method returns a JSON document with `status` set to `success` or
/// `error`; transport and API failures never surface as `Err`.
#[derive(Clone)]
pub struct PrometheusClient {
    base_url: String,
    http: reqwest::Client,
}

impl PrometheusClient {
    pub fn new(cfg: &PrometheusConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.query_timeout_secs))
            .build()
            .context("Failed to create Prometheus HTTP client")?;
        Ok(Self { base_url: cfg.url.trim_end_matches('/').to_string(), http })
    }

    pub async fn health(&self) -> Value {
        let resp = self
            .http
            .get(format!("{}/-/healthy", self.base_url))
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => json!({ "status": "healthy", "prometheus_url": self.base_url }),
            Ok(r) => json!({ "status": "unhealthy", "error": format!("HTTP {}", r.status().as_u16()) }),
            Err(e) => {
                tracing::error!("Prometheus health check failed: {}", e);
                json!({ "status": "error", "error": e.to_string() })
            }
        }
    }

    pub async fn query(&self, query: &str) -> Value {
        match self.api_get("/api/v1/query", &[("query", query.to_string())]).await {
            Ok(data) => json!({
                "status": "success",
                "query": query,
                "result": data.get("result").cloned().unwrap_or(Value::Array(Vec::new())),
                "timestamp": Utc::now().to_rfc3339(),
            }),
            Err(e) => {
                tracing::error!("Prometheus instant query failed: {}", e);
                json!({ "status": "error", "query": query, "error": e })
            }
        }
    }

    pub async fn query_range(&self, query: &str, start: DateTime<Utc>, end: DateTime<Utc>, step: &str) -> Value {
        let params = [
            ("query", query.to_string()),
            ("start", start.to_rfc3339()),
            ("end", end.to_rfc3339()),
            ("step", step.to_string()),
        ];
        match self.api_get("/api/v1/query_range", &params).await {
            Ok(data) => json!({
                "status": "success",
                "query": query,
                "start_time": start.to_rfc3339(),
                "end_time": end.to_rfc3339(),
                "step": step,
                "result": data.get("result").cloned().unwrap_or(Value::Array(Vec::new())),
            }),
            Err(e) => {
                tracing::error!("Prometheus range query failed: {}", e);
                json!({ "status": "error", "query": query, "error": e })
            }
        }
    }

    pub async fn metric_names(&self) -> Value {
        match self.api_get("/api/v1/label/__name__/values", &[]).await {
            Ok(data) => {
                let count = data.as_array().map(Vec::len).unwrap_or(0);
                json!({ "status": "success", "metrics": data, "count": count })
            }
            Err(e) => {
                tracing::error!("Failed to get metrics list: {}", e);
                json!({ "status": "error", "error": e })
            }
        }
    }

    pub async fn targets(&self) -> Value {
        match self.api_get("/api/v1/targets", &[]).await {
            Ok(data) => json!({ "status": "success", "targets": data }),
            Err(e) => {
                tracing::error!("Failed to get targets: {}", e);
                json!({ "status": "error", "error": e })
            }
        }
    }

    pub async fn application_metrics(&self) -> Value {
        json!({
            "status": "success",
            "application_metrics": self.run_set(APPLICATION_QUERIES).await,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    pub async fn system_metrics(&self) -> Value {
        json!({
            "status": "success",
            "system_metrics": self.run_set(SYSTEM_QUERIES).await,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    async fn run_set(&self, queries: &[(&str, &str)]) -> Map<String, Value> {
        let mut results = Map::new();
        for (name, q) in queries {
            results.insert(name.to_string(), self.query(q).await);
        }
        results
    }

    /// GET an API path and unwrap the `data` member of a success envelope.
    async fn api_get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, String> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);

        if body.get("status").and_then(Value::as_str) == Some("success") {
            return Ok(body.get("data").cloned().unwrap_or(Value::Null));
        }

        Err(body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16())))
    }
}
