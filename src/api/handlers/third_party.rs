use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::superuser::SuperUser;
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::monitoring::collector::CollectionStatus;
use crate::tasks::Task;

pub async fn collect(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
) -> Json<Value> {
    let job_id = state.tasks.enqueue(Task::CollectThirdPartyMetrics).await;
    Json(json!({
        "message": "Third-party metrics collection started",
        "job_id": job_id,
    }))
}

pub async fn collect_one(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(api_name): Path<String>,
) -> AppResult<Json<Value>> {
    if state.collector.source(&api_name).await.is_none() {
        return Err(unknown_api(&api_name));
    }
    let job_id = state.tasks.enqueue(Task::CollectSpecificApi { api_name: api_name.clone() }).await;
    Ok(Json(json!({
        "message": format!("Metrics collection started for {}", api_name),
        "job_id": job_id,
    })))
}

pub async fn config(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Value> {
    let sources = state.collector.sources().await;
    let count = sources.len();
    Json(json!({ "apis": sources, "total": count }))
}

pub async fn enable(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(api_name): Path<String>,
) -> AppResult<Json<Value>> {
    toggle(&state, &api_name, true).await
}

pub async fn disable(
    State(state): State<Arc<AppState>>,
    _admin: SuperUser,
    Path(api_name): Path<String>,
) -> AppResult<Json<Value>> {
    toggle(&state, &api_name, false).await
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<CollectionStatus> {
    Json(state.collector.status().await)
}

async fn toggle(state: &AppState, api_name: &str, enabled: bool) -> AppResult<Json<Value>> {
    if !state.collector.set_enabled(api_name, enabled).await {
        return Err(unknown_api(api_name));
    }
    let verb = if enabled { "enabled" } else { "disabled" };
    tracing::info!("Third-party API {} {}", api_name, verb);
    Ok(Json(json!({
        "message": format!("API {} {}", api_name, verb),
        "api_name": api_name,
        "enabled": enabled,
    })))
}

fn unknown_api(api_name: &str) -> AppError {
    AppError::NotFound(format!("API configuration not found for: {}", api_name))
}
