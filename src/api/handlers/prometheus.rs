use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::middleware::auth::AuthUser;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::monitoring::prometheus::quick_query;

const DEFAULT_STEP: &str = "15s";

#[derive(Debug, Deserialize)]
pub struct InstantQuery {
    pub query: String,
}

/// `start`/`end` default to the last hour.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub query: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub step: Option<String>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.prometheus.health().await)
}

pub async fn query_get(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<InstantQuery>,
) -> AppResult<Json<Value>> {
    instant(&state, &q.query).await
}

pub async fn query_post(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(q): Json<InstantQuery>,
) -> AppResult<Json<Value>> {
    instant(&state, &q.query).await
}

pub async fn query_range_get(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Query(q): Query<RangeQuery>,
) -> AppResult<Json<Value>> {
    range(&state, q).await
}

pub async fn query_range_post(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(q): Json<RangeQuery>,
) -> AppResult<Json<Value>> {
    range(&state, q).await
}

pub async fn metrics(State(state): State<Arc<AppState>>, _auth: AuthUser) -> Json<Value> {
    Json(state.prometheus.metric_names().await)
}

pub async fn targets(State(state): State<Arc<AppState>>, _auth: AuthUser) -> Json<Value> {
    Json(state.prometheus.targets().await)
}

pub async fn application_metrics(State(state): State<Arc<AppState>>, _auth: AuthUser) -> Json<Value> {
    Json(state.prometheus.application_metrics().await)
}

pub async fn system_metrics(State(state): State<Arc<AppState>>, _auth: AuthUser) -> Json<Value> {
    Json(state.prometheus.system_metrics().await)
}

pub async fn quick(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(kind): Path<String>,
) -> AppResult<Json<Value>> {
    let query = quick_query(&kind)
        .ok_or_else(|| AppError::NotFound(format!("Unknown quick query: {}", kind)))?;
    let mut result = state.prometheus.query(query).await;
    result["metric_type"] = json!(kind);
    Ok(Json(result))
}

async fn instant(state: &AppState, query: &str) -> AppResult<Json<Value>> {
    let query = non_blank(query)?;
    Ok(Json(state.prometheus.query(query).await))
}

async fn range(state: &AppState, q: RangeQuery) -> AppResult<Json<Value>> {
    let query = non_blank(&q.query)?;
    let end = q.end.unwrap_or_else(Utc::now);
    let start = q.start.unwrap_or(end - Duration::hours(1));
    if start > end {
        return Err(AppError::Validation("start must not be after end".to_string()));
    }
    let step = q.step.as_deref().filter(|s| !s.trim().is_empty()).unwrap_or(DEFAULT_STEP);
    Ok(Json(state.prometheus.query_range(query, start, end, step).await))
}

fn non_blank(query: &str) -> AppResult<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::Validation("Query cannot be empty".to_string()));
    }
    Ok(query)
}
