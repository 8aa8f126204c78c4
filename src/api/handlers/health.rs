use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use crate::api::AppState;

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to {}", state.service_name),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service_name,
    }))
}
