use anyhow::Context;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

use super::{
    extract_token, join_url, query_pairs, session_lifetime, AuthOutcome, AuthSummary, CallRequest, CallResponse,
    SystemStatus,
};
use crate::db::models::external_system::{
    AuthStatus, CallLogRepository, ExternalSystem, ExternalSystemRepository, ExternalSystemSession, NewCallLog,
    SessionRepository,
};
use crate::db::{timestamp, DbPool};
use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct ExternalSystemService {
    db: DbPool,
    http: reqwest::Client,
}

/// Raw outcome of one proxied request.
struct Exchange {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Value,
    elapsed_ms: i64,
}

impl ExternalSystemService {
    pub fn new(db: DbPool) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("opsdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { db, http })
    }

    pub async fn authenticate(&self, name: &str) -> AppResult<AuthOutcome> {
        let Some(system) = ExternalSystemRepository::get_by_name(&self.db, name).await? else {
            return Ok(AuthOutcome::failed(None, name, format!("System '{}' not found", name)));
        };
        if !system.is_active {
            return Ok(AuthOutcome::failed(Some(system.id), name, format!("System '{}' is disabled", name)));
        }
        self.login(&system).await
    }

    pub async fn authenticate_all(&self) -> AppResult<AuthSummary> {
        let systems = ExternalSystemRepository::list_active(&self.db).await?;
        let mut results = Vec::with_capacity(systems.len());
        for system in &systems {
            results.push(self.login(system).await?);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(AuthSummary {
            total_systems: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            results,
        })
    }

    pub async fn status(&self, name: &str) -> AppResult<SystemStatus> {
        let system = ExternalSystemRepository::get_by_name(&self.db, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("System '{}' not found", name)))?;
        self.describe(system).await
    }

    pub async fn status_all(&self) -> AppResult<Vec<SystemStatus>> {
        let systems = ExternalSystemRepository::list_active(&self.db).await?;
        let mut out = Vec::with_capacity(systems.len());
        for system in systems {
            out.push(self.describe(system).await?);
        }
        Ok(out)
    }

    async fn describe(&self, system: ExternalSystem) -> AppResult<SystemStatus> {
        let session = SessionRepository::active(&self.db, system.id).await?;
        Ok(SystemStatus {
            system_id: system.id,
            system_name: system.name,
            display_name: system.display_name,
            status: system.auth_status,
            is_active: system.is_active,
            last_login_time: system.last_login_time,
            last_error: system.last_error,
            is_session_valid: session.is_some(),
            session_expires_at: session.and_then(|s| s.expires_at),
        })
    }

    /// Proxy a request to the named system, logging in as needed.
    pub async fn call(&self, name: &str, req: &CallRequest) -> AppResult<CallResponse> {
        let method = parse_method(&req.method)?;

        let system = ExternalSystemRepository::get_by_name(&self.db, name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("System '{}' not found", name)))?;
        if !system.is_active {
            return Err(AppError::Validation(format!("System '{}' is disabled", name)));
        }

        let mut session = match SessionRepository::active(&self.db, system.id).await? {
            Some(s) => s,
            None => self.fresh_session(&system).await?,
        };

        let mut result = self.send(&system, &session, method.clone(), req).await;
        if matches!(&result, Ok(ex) if ex.status == StatusCode::UNAUTHORIZED) {
            info!("Session for '{}' rejected by remote, re-authenticating", system.name);
            SessionRepository::invalidate(&self.db, session.id).await?;
            session = self.fresh_session(&system).await?;
            result = self.send(&system, &session, method.clone(), req).await;
        }

        SessionRepository::record_use(&self.db, session.id).await?;

        let exchange = match result {
            Ok(ex) => ex,
            Err(e) => {
                let message = format!("Request to '{}' failed: {}", system.name, e);
                self.log_call(&system, "api_call", method.as_str(), req, None, None, None, false, Some(&message))
                    .await;
                return Err(AppError::Upstream(message));
            }
        };

        let success = exchange.status.is_success();
        let error = (!success).then(|| format!("Remote returned HTTP {}", exchange.status.as_u16()));
        self.log_call(
            &system,
            "api_call",
            method.as_str(),
            req,
            Some(exchange.status.as_u16()),
            Some(exchange.elapsed_ms),
            Some(&exchange.body),
            success,
            error.as_deref(),
        )
        .await;

        if let Some(message) = error {
            return Err(AppError::Upstream(format!("{} from '{}'", message, system.name)));
        }

        Ok(CallResponse {
            status_code: exchange.status.as_u16(),
            data: exchange.body,
            headers: exchange.headers,
        })
    }

    async fn fresh_session(&self, system: &ExternalSystem) -> AppResult<ExternalSystemSession> {
        if session_lifetime(system.session_timeout).is_none() {
            return Err(AppError::Validation(invalid_timeout(system)));
        }
        let outcome = self.login(system).await?;
        if !outcome.success {
            return Err(AppError::Upstream(format!("Authentication failed: {}", outcome.message)));
        }
        SessionRepository::active(&self.db, system.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("No session stored after login to '{}'", system.name)))
    }

    async fn login(&self, system: &ExternalSystem) -> AppResult<AuthOutcome> {
        let Some(lifetime) = session_lifetime(system.session_timeout) else {
            let message = invalid_timeout(system);
            warn!("Not authenticating to '{}': {}", system.name, message);
            ExternalSystemRepository::update_auth_status(&self.db, system.id, AuthStatus::Error, Some(&message))
                .await?;
            return Ok(AuthOutcome::failed(Some(system.id), &system.name, message));
        };

        let url = join_url(&system.base_url, system.login_path());
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .json(&json!({ "username": system.username, "password": system.password }))
            .send()
            .await;

        let (status, body) = match response {
            Ok(resp) => {
                let status = resp.status();
                let body = read_body(resp).await;
                (Some(status), body)
            }
            Err(e) => (None, json!({ "message": format!("Connection error: {}", e) })),
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let accepted = status.is_some_and(|s| s.is_success()) && body.get("success") != Some(&Value::Bool(false));

        if !accepted {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| status.map(|s| format!("Login rejected with HTTP {}", s.as_u16())))
                .unwrap_or_else(|| "Login failed".to_string());

            warn!("Authentication to '{}' failed: {}", system.name, message);
            ExternalSystemRepository::update_auth_status(&self.db, system.id, AuthStatus::Error, Some(&message))
                .await?;
            self.write_log(NewCallLog {
                system_id: system.id,
                operation: "authenticate",
                endpoint: system.login_path().to_string(),
                request_method: "POST".to_string(),
                request_data: Some(json!({ "username": system.username })),
                response_status: status.map(|s| s.as_u16()),
                response_time_ms: Some(elapsed_ms),
                response_data: Some(body),
                is_success: false,
                error_message: Some(message.clone()),
            })
            .await;
            return Ok(AuthOutcome::failed(Some(system.id), &system.name, message));
        }

        let token = extract_token(&body).unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let expires_at = Utc::now()
            .checked_add_signed(lifetime)
            .map(timestamp)
            .ok_or_else(|| AppError::Internal(format!("Session expiry out of range for '{}'", system.name)))?;

        SessionRepository::invalidate_all(&self.db, system.id).await?;
        SessionRepository::create(&self.db, system.id, &token, Some(&body), &expires_at).await?;
        ExternalSystemRepository::update_auth_status(&self.db, system.id, AuthStatus::Active, None).await?;

        self.write_log(NewCallLog {
            system_id: system.id,
            operation: "authenticate",
            endpoint: system.login_path().to_string(),
            request_method: "POST".to_string(),
            request_data: Some(json!({ "username": system.username })),
            response_status: status.map(|s| s.as_u16()),
            response_time_ms: Some(elapsed_ms),
            response_data: Some(body),
            is_success: true,
            error_message: None,
        })
        .await;

        info!("Authenticated to external system '{}'", system.name);
        Ok(AuthOutcome {
            system_id: Some(system.id),
            system_name: system.name.clone(),
            success: true,
            message: "Authentication successful".to_string(),
            session_token: Some(token),
            expires_at: Some(expires_at),
        })
    }

    async fn send(
        &self,
        system: &ExternalSystem,
        session: &ExternalSystemSession,
        method: Method,
        req: &CallRequest,
    ) -> Result<Exchange, reqwest::Error> {
        let url = join_url(&system.base_url, &req.endpoint);
        let mut builder = self.http.request(method, &url);

        if let Some(params) = &req.params {
            builder = builder.query(&query_pairs(params));
        }
        if let Some(headers) = &req.headers {
            for (k, v) in headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
        }
        if let Some(token) = &session.session_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(data) = &req.data {
            builder = builder.json(data);
        }

        let started = Instant::now();
        let resp = builder.send().await?;
        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = read_body(resp).await;

        Ok(Exchange { status, headers, body, elapsed_ms: started.elapsed().as_millis() as i64 })
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_call(
        &self,
        system: &ExternalSystem,
        operation: &'static str,
        method: &str,
        req: &CallRequest,
        status: Option<u16>,
        elapsed_ms: Option<i64>,
        body: Option<&Value>,
        success: bool,
        error: Option<&str>,
    ) {
        self.write_log(NewCallLog {
            system_id: system.id,
            operation,
            endpoint: req.endpoint.clone(),
            request_method: method.to_string(),
            request_data: Some(json!({ "params": req.params, "data": req.data })),
            response_status: status,
            response_time_ms: elapsed_ms,
            response_data: body.cloned(),
            is_success: success,
            error_message: error.map(str::to_string),
        })
        .await;
    }

    /// Log rows are diagnostics; a failed insert must not fail the call.
    async fn write_log(&self, log: NewCallLog) {
        if let Err(e) = CallLogRepository::create(&self.db, log).await {
            warn!("Failed to write external system log: {}", e);
        }
    }
}

fn invalid_timeout(system: &ExternalSystem) -> String {
    format!("Invalid session_timeout {} for system '{}'", system.session_timeout, system.name)
}

fn parse_method(method: &str) -> AppResult<Method> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        other => Err(AppError::Validation(format!("Unsupported HTTP method: {}", other))),
    }
}

/// JSON body, or `{"text": ...}` when the remote did not send JSON.
async fn read_body(resp: reqwest::Response) -> Value {
    match resp.text().await {
        Ok(text) if text.trim().is_empty() => Value::Null,
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text })),
        Err(e) => json!({ "text": format!("<unreadable body: {}>", e) }),
    }
}
