use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::pushgateway::{self, Pushgateway, Sample};
use crate::config::{ApiSourceConfig, CollectorConfig, PushgatewayConfig};

#[derive(Debug, Clone, Serialize)]
pub struct ApiSource {
    pub name: String,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub interval: u64,
    pub enabled: bool,
}

impl From<&ApiSourceConfig> for ApiSource {
    fn from(c: &ApiSourceConfig) -> Self {
        Self {
            name: c.name.clone(),
            url: c.url.clone(),
            params: c.params.clone(),
            interval: c.interval_secs,
            enabled: c.enabled,
        }
    }
}

/// Sample sources used when no APIs are configured.
pub fn builtin_sources() -> Vec<ApiSource> {
    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    vec![
        ApiSource {
            name: "weather_api".to_string(),
            url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            params: params(&[("q", "London"), ("appid", "your_api_key")]),
            interval: 300,
            enabled: true,
        },
        ApiSource {
            name: "crypto_api".to_string(),
            url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            params: params(&[("ids", "bitcoin,ethereum"), ("vs_currencies", "usd")]),
            interval: 60,
            enabled: true,
        },
        ApiSource {
            name: "stock_api".to_string(),
            url: "https://api.example.com/stock/price".to_string(),
            params: params(&[("symbols", "AAPL,GOOGL,MSFT")]),
            interval: 300,
            enabled: false,
        },
    ]
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub api_name: String,
    pub status: &'static str,
    /// Seconds.
    pub response_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
    pub quality_score: f64,
}

impl CollectionResult {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Serialize)]
pub struct CollectionStatus {
    pub total_apis: usize,
    pub enabled_apis: usize,
    pub disabled_apis: usize,
    pub enabled_api_names: Vec<String>,
    pub disabled_api_names: Vec<String>,
}

/// Polls third-party JSON APIs and exports what they return as metrics.
pub struct Collector {
    sources: RwLock<Vec<ApiSource>>,
    http: reqwest::Client,
    pushgateway: Pushgateway,
}

impl Collector {
    pub fn new(cfg: &CollectorConfig, push: &PushgatewayConfig) -> anyhow::Result<Self> {
        let sources = if cfg.apis.is_empty() {
            builtin_sources()
        } else {
            cfg.apis.iter().map(ApiSource::from).collect()
        };
        Self::with_sources(sources, cfg.request_timeout_secs, push)
    }

    pub fn with_sources(sources: Vec<ApiSource>, timeout_secs: u64, push: &PushgatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create collector HTTP client")?;
        Ok(Self { sources: RwLock::new(sources), http, pushgateway: Pushgateway::new(push)? })
    }

    pub async fn sources(&self) -> Vec<ApiSource> {
        self.sources.read().await.clone()
    }

    pub async fn source(&self, name: &str) -> Option<ApiSource> {
        self.sources.read().await.iter().find(|s| s.name == name).cloned()
    }

    /// Returns false when no source has that name.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut sources = self.sources.write().await;
        match sources.iter_mut().find(|s| s.name == name) {
            Some(source) => {
                source.enabled = enabled;
                info!("Third-party API {} {}", name, if enabled { "enabled" } else { "disabled" });
                true
            }
            None => false,
        }
    }

    pub async fn status(&self) -> CollectionStatus {
        let sources = self.sources.read().await;
        let (enabled, disabled): (Vec<&ApiSource>, Vec<&ApiSource>) = sources.iter().partition(|s| s.enabled);
        CollectionStatus {
            total_apis: sources.len(),
            enabled_apis: enabled.len(),
            disabled_apis: disabled.len(),
            enabled_api_names: enabled.iter().map(|s| s.name.clone()).collect(),
            disabled_api_names: disabled.iter().map(|s| s.name.clone()).collect(),
        }
    }

    pub async fn collect_one(&self, source: &ApiSource) -> CollectionResult {
        fetch(self.http.clone(), source.clone()).await
    }

    /// Fetch every enabled source concurrently.
    pub async fn collect_all(&self) -> Vec<CollectionResult> {
        let enabled: Vec<ApiSource> = self.sources.read().await.iter().filter(|s| s.enabled).cloned().collect();

        let mut set = JoinSet::new();
        for source in enabled {
            set.spawn(fetch(self.http.clone(), source));
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Collection task panicked: {}", e),
            }
        }
        results.sort_by(|a, b| a.api_name.cmp(&b.api_name));
        results
    }

    /// Push successful results; returns how many were accepted by the gateway.
    pub async fn push(&self, results: &[CollectionResult]) -> usize {
        let mut pushed = 0;
        for result in results.iter().filter(|r| r.is_success()) {
            let endpoint = self
                .source(&result.api_name)
                .await
                .map(|s| s.url)
                .unwrap_or_else(|| "unknown".to_string());
            let body = pushgateway::render(&Sample {
                api_name: &result.api_name,
                endpoint: &endpoint,
                success: true,
                response_time: result.response_time,
                quality_score: result.quality_score,
                data: result.data.as_ref(),
            });

            let job = format!("third_party_{}", result.api_name);
            match self.pushgateway.push(&job, &result.api_name, body).await {
                Ok(true) => pushed += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to push metrics for {}: {}", result.api_name, e),
            }
        }
        info!("Pushed metrics for {}/{} APIs", pushed, results.len());
        pushed
    }

    /// Body of the `collect_third_party_metrics` job.
    pub async fn run_all(&self) -> String {
        let results = self.collect_all().await;
        if results.is_empty() {
            warn!("No API data collected");
            return "No API data collected".to_string();
        }

        let ok = results.iter().filter(|r| r.is_success()).count();
        let pushed = self.push(&results).await;
        if !self.pushgateway.is_configured() {
            return format!("Collected {}/{} APIs; Pushgateway not configured", ok, results.len());
        }
        format!("Collected {}/{} APIs, pushed metrics for {}", ok, results.len(), pushed)
    }

    /// Body of the `collect_specific_api` job.
    pub async fn run_one(&self, api_name: &str) -> String {
        let Some(source) = self.source(api_name).await else {
            error!("API configuration not found for: {}", api_name);
            return format!("API configuration not found for: {}", api_name);
        };

        let result = self.collect_one(&source).await;
        if !result.is_success() {
            let reason = result.error.as_deref().unwrap_or("Unknown error");
            return format!("Failed to collect data for {}: {}", api_name, reason);
        }

        if self.push(std::slice::from_ref(&result)).await > 0 {
            format!("Successfully collected and pushed metrics for {}", api_name)
        } else {
            format!("Collected data for {}; metrics were not pushed", api_name)
        }
    }
}

async fn fetch(http: reqwest::Client, source: ApiSource) -> CollectionResult {
    let started = Instant::now();
    let timestamp = Utc::now().to_rfc3339();
    info!("Collecting data from {}", source.name);

    let failed = |error: String, started: Instant| CollectionResult {
        api_name: source.name.clone(),
        status: "error",
        response_time: started.elapsed().as_secs_f64(),
        data: None,
        error: Some(error),
        timestamp: timestamp.clone(),
        quality_score: 0.0,
    };

    let resp = match http.get(&source.url).query(&source.params).send().await {
        Ok(r) => r,
        Err(e) => {
            error!("Error collecting data from {}: {}", source.name, e);
            return failed(e.to_string(), started);
        }
    };

    if !resp.status().is_success() {
        error!("API {} returned status {}", source.name, resp.status());
        return failed(format!("HTTP {}", resp.status().as_u16()), started);
    }

    match resp.json::<Value>().await {
        Ok(data) => CollectionResult {
            api_name: source.name.clone(),
            status: "success",
            response_time: started.elapsed().as_secs_f64(),
            quality_score: quality_score(&data),
            data: Some(data),
            error: None,
            timestamp: timestamp.clone(),
        },
        Err(e) => failed(format!("Invalid JSON: {}", e), started),
    }
}

/// 1.0 for complete data; empty containers lose 0.5 and blank members
/// cost up to 0.3 in proportion to how many there are.
pub fn quality_score(data: &Value) -> f64 {
    fn blank(v: &Value) -> bool {
        match v {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }
    fn falsy(v: &Value) -> bool {
        match v {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
        }
    }

    let score = match data {
        Value::Null => return 0.0,
        Value::Object(map) if map.is_empty() => return 0.0,
        Value::Array(items) if items.is_empty() => return 0.0,
        Value::Object(map) => {
            let empty = map.values().filter(|v| blank(v)).count();
            1.0 - (empty as f64 / map.len() as f64) * 0.3
        }
        Value::Array(items) => {
            let empty = items.iter().filter(|v| falsy(v)).count();
            1.0 - (empty as f64 / items.len() as f64) * 0.3
        }
        other if falsy(other) => return 0.0,
        _ => 1.0,
    };
    score.clamp(0.0, 1.0)
}
