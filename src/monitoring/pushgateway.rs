use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

use crate::config::PushgatewayConfig;

/// One collection run as seen by the exporter.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    pub api_name: &'a str,
    pub endpoint: &'a str,
    pub success: bool,
    pub response_time: f64,
    pub quality_score: f64,
    pub data: Option<&'a Value>,
}

/// Pushes text-format samples to a Prometheus Pushgateway.
#[derive(Clone)]
pub struct Pushgateway {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

impl Pushgateway {
    pub fn new(cfg: &PushgatewayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create Pushgateway HTTP client")?;
        Ok(Self {
            url: cfg.url.as_ref().map(|u| u.trim_end_matches('/').to_string()).filter(|u| !u.is_empty()),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            http,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Replace the metric group `job/{job}/api_name/{api_name}`.
    /// Returns `Ok(false)` when no gateway is configured.
    pub async fn push(&self, job: &str, api_name: &str, body: String) -> Result<bool> {
        let Some(url) = &self.url else {
            tracing::debug!("Pushgateway not configured; dropping metrics for {}", api_name);
            return Ok(false);
        };

        let target = format!("{}/metrics/job/{}/api_name/{}", url, path_segment(job), path_segment(api_name));
        let mut req = self
            .http
            .put(&target)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(body);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req.send().await.context("Pushgateway request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Pushgateway returned HTTP {}", resp.status());
        }
        tracing::info!("Metrics pushed successfully for job: {}", job);
        Ok(true)
    }
}

/// Render one collection result in the Prometheus text exposition format.
pub fn render(sample: &Sample<'_>) -> String {
    let api = escape_label(sample.api_name);
    let endpoint = escape_label(sample.endpoint);
    let status = if sample.success { "success" } else { "error" };
    let mut out = String::new();

    let _ = writeln!(out, "# HELP third_party_api_requests_total Total number of third party API requests");
    let _ = writeln!(out, "# TYPE third_party_api_requests_total counter");
    let _ = writeln!(
        out,
        "third_party_api_requests_total{{api_name=\"{api}\",endpoint=\"{endpoint}\",status=\"{status}\"}} 1"
    );

    let _ = writeln!(out, "# HELP third_party_api_request_duration_seconds Duration of third party API requests");
    let _ = writeln!(out, "# TYPE third_party_api_request_duration_seconds gauge");
    let _ = writeln!(
        out,
        "third_party_api_request_duration_seconds{{api_name=\"{api}\",endpoint=\"{endpoint}\"}} {}",
        sample.response_time
    );

    let business = sample.data.map(business_values).unwrap_or_default();
    if !business.is_empty() {
        let _ = writeln!(out, "# HELP business_metrics Business metrics from third party APIs");
        let _ = writeln!(out, "# TYPE business_metrics gauge");
        for (name, category, value) in business {
            let _ = writeln!(
                out,
                "business_metrics{{metric_name=\"{}\",source=\"{api}\",category=\"{category}\"}} {value}",
                escape_label(&name)
            );
        }
    }

    let _ = writeln!(out, "# HELP data_quality_score Data quality score from third party sources");
    let _ = writeln!(out, "# TYPE data_quality_score gauge");
    let _ = writeln!(
        out,
        "data_quality_score{{source=\"{api}\",data_type=\"api_response\"}} {}",
        sample.quality_score
    );

    out
}

/// Numeric values worth exporting: the length of a list, or the numeric
/// fields of an object, descending one level into nested objects.
fn business_values(data: &Value) -> Vec<(String, &'static str, f64)> {
    match data {
        Value::Array(items) => vec![("business_data_count".to_string(), "count", items.len() as f64)],
        Value::Object(map) => {
            let mut out = Vec::new();
            for (key, value) in map {
                match value {
                    Value::Number(n) => {
                        if let Some(f) = n.as_f64() {
                            out.push((format!("business_{}", metric_key(key)), "value", f));
                        }
                    }
                    Value::Object(inner) => {
                        for (inner_key, inner_value) in inner {
                            if let Some(f) = inner_value.as_f64() {
                                out.push((
                                    format!("business_{}_{}", metric_key(key), metric_key(inner_key)),
                                    "value",
                                    f,
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

fn metric_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect()
}
