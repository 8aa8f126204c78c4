//! Proxy for remote systems that require a username/password login.
//!
//! Sessions are cached in `external_system_sessions`; a call without a valid
//! session logs in first, and a remote 401 triggers one fresh login and retry.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub mod service;

pub use service::ExternalSystemService;

/// Upper bound for `session_timeout`, one year in seconds.
pub const MAX_SESSION_TIMEOUT: i64 = 31_536_000;

/// Session lifetime for a configured timeout, or `None` when it is out of range.
pub fn session_lifetime(session_timeout: i64) -> Option<Duration> {
    if !(1..=MAX_SESSION_TIMEOUT).contains(&session_timeout) {
        return None;
    }
    Duration::try_seconds(session_timeout)
}

/// Result of a login attempt. Failures are data, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub system_id: Option<i64>,
    pub system_name: String,
    pub success: bool,
    pub message: String,
    pub session_token: Option<String>,
    pub expires_at: Option<String>,
}

impl AuthOutcome {
    pub fn failed(system_id: Option<i64>, system_name: &str, message: impl Into<String>) -> Self {
        Self {
            system_id,
            system_name: system_name.to_string(),
            success: false,
            message: message.into(),
            session_token: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthSummary {
    pub total_systems: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<AuthOutcome>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub system_id: i64,
    pub system_name: String,
    pub display_name: Option<String>,
    pub status: String,
    pub is_active: bool,
    pub last_login_time: Option<String>,
    pub last_error: Option<String>,
    pub is_session_valid: bool,
    pub session_expires_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

fn default_method() -> String { "GET".to_string() }

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub status_code: u16,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Pull a session token out of a login response body.
pub fn extract_token(body: &Value) -> Option<String> {
    ["token", "access_token"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str).filter(|t| !t.is_empty()))
        .or_else(|| body.pointer("/data/token").and_then(Value::as_str).filter(|t| !t.is_empty()))
        .map(str::to_string)
}

/// Render query parameters as strings; JSON strings lose their quotes.
pub fn query_pairs(params: &HashMap<String, Value>) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect();
    pairs.sort();
    pairs
}
